//! Query builder.
//!
//! Turns raw request parameters into a validated [`SearchRequest`], then into
//! one [`Predicate`] per source table. A predicate only names canonical
//! [`Field`]s; the storage backends resolve them to real columns through the
//! source catalog, so the same filter means the same thing on every table.
//!
//! Predicates never embed user text into SQL. The Postgres renderer binds every
//! value, and [`Predicate::matches`] evaluates the identical logic in process.

use crate::error::{Result, SearchError};
use crate::sources::{Field, SourceName, SourceRecord, SourceTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Default page size when neither `per_page` nor `limit` is given
pub const DEFAULT_PER_PAGE: u32 = 10;

/// Largest accepted page size
pub const MAX_PER_PAGE: u32 = 100;

/// Raw query-string parameters, exactly as received.
///
/// Numbers stay strings here so bad input becomes a `Validation` error with a
/// useful message instead of a generic extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub query: Option<String>,
    pub page: Option<String>,
    #[serde(alias = "limit")]
    pub per_page: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub publisher: Option<String>,
    pub year_from: Option<String>,
    pub year_to: Option<String>,
    pub min_citations: Option<String>,
    pub identifier_types: Option<String>,
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub arxiv: Option<String>,
    pub isbn: Option<String>,
    #[serde(alias = "source")]
    pub sources: Option<String>,
}

/// Identifier kinds a record can be required to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentifierType {
    Doi,
    Pmid,
    Pmcid,
    Arxiv,
    Isbn,
}

impl IdentifierType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Doi => "doi",
            Self::Pmid => "pmid",
            Self::Pmcid => "pmcid",
            Self::Arxiv => "arxiv",
            Self::Isbn => "isbn",
        }
    }

    /// Field holding this identifier directly, when tables have one.
    pub fn column_field(self) -> Option<Field> {
        match self {
            Self::Doi => Some(Field::Doi),
            Self::Isbn => Some(Field::Isbn),
            _ => None,
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdentifierType {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "doi" => Ok(Self::Doi),
            "pmid" => Ok(Self::Pmid),
            "pmcid" => Ok(Self::Pmcid),
            "arxiv" => Ok(Self::Arxiv),
            "isbn" => Ok(Self::Isbn),
            other => Err(SearchError::Validation(format!(
                "Unknown identifier type: {}",
                other
            ))),
        }
    }
}

/// Validated filters for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct SearchFilters {
    /// Free text, matched against title, author and venue
    pub text: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
    pub journal: Option<String>,
    pub publisher: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub min_citations: Option<u64>,
    pub identifier_types: BTreeSet<IdentifierType>,
    /// Restrict to these sources; empty means every enabled source
    pub sources: BTreeSet<SourceName>,
}

impl SearchFilters {
    /// Whether anything beyond free text narrows the result set.
    pub fn has_structured(&self) -> bool {
        self.author.is_some()
            || self.title.is_some()
            || self.journal.is_some()
            || self.publisher.is_some()
            || self.year_from.is_some()
            || self.year_to.is_some()
            || self.min_citations.is_some()
            || !self.identifier_types.is_empty()
            || !self.sources.is_empty()
    }
}

/// A fully validated search: filters plus the pagination window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SearchRequest {
    pub filters: SearchFilters,
    pub page: u32,
    pub per_page: u32,
}

impl SearchRequest {
    pub fn new(filters: SearchFilters, page: u32, per_page: u32) -> Self {
        Self {
            filters,
            page,
            per_page,
        }
    }

    /// Rows skipped before this page in the combined ordering.
    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.per_page as usize
    }

    /// Exclusive end of this page in the combined ordering.
    pub fn window_end(&self) -> usize {
        self.page as usize * self.per_page as usize
    }
}

impl SearchParams {
    /// Validate into a [`SearchRequest`].
    ///
    /// `enabled` is the set of configured sources and `max_window` the deepest
    /// row (`page * per_page`) a caller may ask for.
    pub fn validate(&self, enabled: &[SourceName], max_window: usize) -> Result<SearchRequest> {
        let page = match non_blank(&self.page) {
            Some(raw) => parse_number::<u32>("page", &raw)?,
            None => 1,
        };
        if page < 1 {
            return Err(SearchError::Validation("page must be at least 1".into()));
        }

        let per_page = match non_blank(&self.per_page) {
            Some(raw) => parse_number::<u32>("per_page", &raw)?,
            None => DEFAULT_PER_PAGE,
        };
        if per_page < 1 || per_page > MAX_PER_PAGE {
            return Err(SearchError::Validation(format!(
                "per_page must be between 1 and {}",
                MAX_PER_PAGE
            )));
        }

        let window = page as usize * per_page as usize;
        if window > max_window {
            return Err(SearchError::Validation(format!(
                "page {} with per_page {} exceeds the maximum result window of {}",
                page, per_page, max_window
            )));
        }

        let year_from = non_blank(&self.year_from)
            .map(|raw| parse_number::<u16>("year_from", &raw).map(i32::from))
            .transpose()?;
        let year_to = non_blank(&self.year_to)
            .map(|raw| parse_number::<u16>("year_to", &raw).map(i32::from))
            .transpose()?;
        if let (Some(from), Some(to)) = (year_from, year_to) {
            if from > to {
                return Err(SearchError::Validation(format!(
                    "year_from ({}) must not be after year_to ({})",
                    from, to
                )));
            }
        }

        let min_citations = non_blank(&self.min_citations)
            .map(|raw| parse_number::<u64>("min_citations", &raw))
            .transpose()?;

        let mut identifier_types = BTreeSet::new();
        if let Some(list) = non_blank(&self.identifier_types) {
            for item in list.split(',').filter(|s| !s.trim().is_empty()) {
                identifier_types.insert(item.parse::<IdentifierType>()?);
            }
        }
        let flags = [
            (IdentifierType::Doi, &self.doi),
            (IdentifierType::Pmid, &self.pmid),
            (IdentifierType::Pmcid, &self.pmcid),
            (IdentifierType::Arxiv, &self.arxiv),
            (IdentifierType::Isbn, &self.isbn),
        ];
        for (kind, flag) in flags {
            if let Some(raw) = non_blank(flag) {
                if parse_flag(kind.as_str(), &raw)? {
                    identifier_types.insert(kind);
                }
            }
        }

        let mut sources = BTreeSet::new();
        if let Some(list) = non_blank(&self.sources) {
            for item in list.split(',').filter(|s| !s.trim().is_empty()) {
                let name = item.parse::<SourceName>()?;
                if !enabled.contains(&name) {
                    return Err(SearchError::Validation(format!(
                        "Source is not enabled: {}",
                        name
                    )));
                }
                sources.insert(name);
            }
        }

        let filters = SearchFilters {
            text: non_blank(&self.query),
            author: non_blank(&self.author),
            title: non_blank(&self.title),
            journal: non_blank(&self.journal),
            publisher: non_blank(&self.publisher),
            year_from,
            year_to,
            min_citations,
            identifier_types,
            sources,
        };

        if filters.text.is_none() && !filters.has_structured() {
            return Err(SearchError::Validation(
                "No query provided: give query text or at least one filter".into(),
            ));
        }

        Ok(SearchRequest::new(filters, page, per_page))
    }
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse_number<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>().map_err(|_| {
        SearchError::Validation(format!("{} must be a non-negative whole number, got '{}'", name, raw))
    })
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(SearchError::Validation(format!(
            "{} must be a boolean, got '{}'",
            name, raw
        ))),
    }
}

/// Boolean filter over one source's canonical fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Always,
    Never,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    /// Case-insensitive substring match on any column backing the field
    Contains { field: Field, needle: String },
    /// Inclusive year range; `None` edges are unbounded
    YearRange { from: Option<i32>, to: Option<i32> },
    MinCitations(u64),
    /// Field has a non-blank value
    Present(Field),
}

impl Predicate {
    fn and(parts: Vec<Predicate>) -> Predicate {
        if parts.iter().any(|p| *p == Predicate::Never) {
            return Predicate::Never;
        }
        let mut parts: Vec<_> = parts.into_iter().filter(|p| *p != Predicate::Always).collect();
        match parts.len() {
            0 => Predicate::Always,
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    fn or(parts: Vec<Predicate>) -> Predicate {
        if parts.iter().any(|p| *p == Predicate::Always) {
            return Predicate::Always;
        }
        let mut parts: Vec<_> = parts.into_iter().filter(|p| *p != Predicate::Never).collect();
        match parts.len() {
            0 => Predicate::Never,
            1 => parts.remove(0),
            _ => Predicate::Or(parts),
        }
    }

    /// Evaluate against a raw record, with the same semantics the SQL renderer
    /// produces.
    pub fn matches(&self, record: &SourceRecord) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::And(parts) => parts.iter().all(|p| p.matches(record)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Self::Contains { field, needle } => {
                let needle = needle.to_lowercase();
                record
                    .field_values(*field)
                    .any(|text| text.to_lowercase().contains(&needle))
            }
            Self::YearRange { from, to } => match record.year() {
                Some(year) => from.is_none_or(|f| year >= f) && to.is_none_or(|t| year <= t),
                None => false,
            },
            Self::MinCitations(min) => record.citations() >= *min,
            Self::Present(field) => record.field_text(*field).is_some(),
        }
    }
}

fn contains(table: &SourceTable, field: Field, needle: &str) -> Predicate {
    if table.has(field) {
        Predicate::Contains {
            field,
            needle: needle.to_string(),
        }
    } else {
        Predicate::Never
    }
}

/// Build the predicate for one source table.
///
/// A filter on a field the table does not carry can never match, so that
/// source contributes no rows.
pub fn build_predicate(table: &SourceTable, filters: &SearchFilters) -> Predicate {
    let mut parts = Vec::new();

    if let Some(text) = &filters.text {
        parts.push(Predicate::or(vec![
            contains(table, Field::Title, text),
            contains(table, Field::Author, text),
            contains(table, Field::Venue, text),
        ]));
    }
    if let Some(author) = &filters.author {
        parts.push(contains(table, Field::Author, author));
    }
    if let Some(title) = &filters.title {
        parts.push(contains(table, Field::Title, title));
    }
    if let Some(journal) = &filters.journal {
        parts.push(contains(table, Field::Venue, journal));
    }
    if let Some(publisher) = &filters.publisher {
        parts.push(contains(table, Field::Publisher, publisher));
    }

    if filters.year_from.is_some() || filters.year_to.is_some() {
        parts.push(if table.has(Field::Year) {
            Predicate::YearRange {
                from: filters.year_from,
                to: filters.year_to,
            }
        } else {
            Predicate::Never
        });
    }

    match filters.min_citations {
        // Missing citations normalize to 0, so a zero floor keeps every row
        Some(0) | None => {}
        Some(min) if table.has(Field::Citations) => parts.push(Predicate::MinCitations(min)),
        Some(_) => parts.push(Predicate::Never),
    }

    if !filters.identifier_types.is_empty() {
        let alternatives = filters
            .identifier_types
            .iter()
            .map(|kind| {
                let mentioned = contains(table, Field::Identifiers, kind.as_str());
                match kind.column_field() {
                    Some(field) if table.has(field) => {
                        Predicate::or(vec![Predicate::Present(field), mentioned])
                    }
                    _ => mentioned,
                }
            })
            .collect();
        parts.push(Predicate::or(alternatives));
    }

    Predicate::and(parts)
}

/// Per-source predicates for one request.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub sources: Vec<(SourceName, Predicate)>,
}

impl QueryPlan {
    /// Plan every source the request targets.
    ///
    /// Sources whose predicate is statically `Never` are left out: they cannot
    /// contribute rows and need no round trip.
    pub fn build(request: &SearchRequest, enabled: &[SourceName]) -> Self {
        let sources = enabled
            .iter()
            .copied()
            .filter(|name| {
                request.filters.sources.is_empty() || request.filters.sources.contains(name)
            })
            .map(|name| (name, build_predicate(name.table(), &request.filters)))
            .filter(|(_, predicate)| *predicate != Predicate::Never)
            .collect();
        Self { sources }
    }
}
