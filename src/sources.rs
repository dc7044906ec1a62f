//! Source catalog and the canonical field mapping.
//!
//! Every bibliographic table in the database uses its own column names. Rather
//! than scattering fallback chains through the code, each canonical [`Field`]
//! has one ordered list of raw column names in [`FIELD_PRIORITY`]. The query
//! builder, the SQL renderer, the in-memory evaluator and the normalizer all
//! resolve fields through it, so a row means the same thing everywhere.

use crate::error::{Result, SearchError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// First plausible 4-digit year inside a free-form date string.
///
/// Shared verbatim with the SQL year expression so ordering in Postgres and in
/// the merge step agree.
pub const YEAR_PATTERN: &str = "[1-9][0-9]{3}";

/// Citation text that coerces to a number. Anything else counts as 0.
pub const CITATION_PATTERN: &str = r"^[0-9]{1,15}(\.[0-9]+)?$";

static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(YEAR_PATTERN).expect("valid year pattern"));

static CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(CITATION_PATTERN).expect("valid citation pattern"));

/// Bibliographic source tables known to the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SourceName {
    #[serde(rename = "openalex")]
    OpenAlex,
    #[serde(rename = "crossref")]
    Crossref,
    #[serde(rename = "bibliometric")]
    Bibliometric,
    #[serde(rename = "google_scholar")]
    GoogleScholar,
    #[serde(rename = "cleaned_bibliometric")]
    CleanedBibliometric,
    #[serde(rename = "scopus")]
    Scopus,
    #[serde(rename = "scopus_sept")]
    ScopusSept,
    #[serde(rename = "external_api")]
    ExternalApi,
}

impl SourceName {
    pub const ALL: [SourceName; 8] = [
        SourceName::OpenAlex,
        SourceName::Crossref,
        SourceName::Bibliometric,
        SourceName::GoogleScholar,
        SourceName::CleanedBibliometric,
        SourceName::Scopus,
        SourceName::ScopusSept,
        SourceName::ExternalApi,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAlex => "openalex",
            Self::Crossref => "crossref",
            Self::Bibliometric => "bibliometric",
            Self::GoogleScholar => "google_scholar",
            Self::CleanedBibliometric => "cleaned_bibliometric",
            Self::Scopus => "scopus",
            Self::ScopusSept => "scopus_sept",
            Self::ExternalApi => "external_api",
        }
    }

    /// Static table description for this source.
    pub fn table(self) -> &'static SourceTable {
        // CATALOG is declared in `ALL` order
        &CATALOG[self as usize]
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceName {
    type Err = SearchError;

    /// Accepts the short name or the backing table name.
    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim().to_lowercase();
        SourceName::ALL
            .into_iter()
            .find(|name| name.as_str() == needle || name.table().table == needle)
            .ok_or_else(|| SearchError::Validation(format!("Unknown source: {}", s.trim())))
    }
}

/// Canonical fields a raw row can contribute to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Title,
    Author,
    Year,
    Venue,
    Publisher,
    Citations,
    Doi,
    Isbn,
    Identifiers,
}

/// Raw column names per canonical field, highest priority first.
pub const FIELD_PRIORITY: &[(Field, &[&str])] = &[
    (Field::Title, &["title", "book_title", "display_name"]),
    // Book tables carry no author column; their publisher stands in
    (Field::Author, &["author", "authors", "author_name", "publisher"]),
    (Field::Year, &["year", "publication_year", "published"]),
    (Field::Venue, &["journal", "publisher", "source", "subject", "subject_of_study", "asjc"]),
    (Field::Publisher, &["publisher"]),
    (Field::Citations, &["cited_by", "citations", "citation_count"]),
    (Field::Doi, &["doi"]),
    (Field::Isbn, &["p_isbn", "e_isbn"]),
    (Field::Identifiers, &["identifiers"]),
];

fn priority(field: Field) -> &'static [&'static str] {
    FIELD_PRIORITY
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, cols)| *cols)
        .unwrap_or(&[])
}

/// A source table and the raw columns it actually has.
#[derive(Debug, Serialize)]
pub struct SourceTable {
    pub name: SourceName,
    pub table: &'static str,
    pub id_column: &'static str,
    pub columns: &'static [&'static str],
}

impl SourceTable {
    /// Columns of this table backing `field`, in priority order.
    pub fn columns_for(&self, field: Field) -> Vec<&'static str> {
        priority(field)
            .iter()
            .copied()
            .filter(|col| self.columns.contains(col))
            .collect()
    }

    pub fn has(&self, field: Field) -> bool {
        !self.columns_for(field).is_empty()
    }
}

pub static CATALOG: [SourceTable; 8] = [
    SourceTable {
        name: SourceName::OpenAlex,
        table: "openalex_data",
        id_column: "id",
        columns: &["title", "author", "year", "journal", "subject", "citations", "doi", "identifiers"],
    },
    SourceTable {
        name: SourceName::Crossref,
        table: "crossref_data_multiple_subjects",
        id_column: "id",
        columns: &["title", "authors", "year", "subject", "citation_count", "doi"],
    },
    SourceTable {
        name: SourceName::Bibliometric,
        table: "bibliometric_data",
        id_column: "id",
        columns: &["title", "author_name", "year", "subject", "cited_by", "doi"],
    },
    SourceTable {
        name: SourceName::GoogleScholar,
        table: "google_scholar_data",
        id_column: "id",
        columns: &["title", "author_name", "year", "subject_of_study", "cited_by"],
    },
    SourceTable {
        name: SourceName::CleanedBibliometric,
        table: "cleaned_bibliometric_data",
        id_column: "id",
        columns: &["title", "author", "year", "doi"],
    },
    SourceTable {
        name: SourceName::Scopus,
        table: "scopus_data",
        id_column: "id",
        columns: &["book_title", "publisher", "publication_year", "asjc", "p_isbn", "e_isbn"],
    },
    SourceTable {
        name: SourceName::ScopusSept,
        table: "scopus_data_sept",
        id_column: "id",
        columns: &["book_title", "publisher", "publication_year", "asjc", "p_isbn", "e_isbn"],
    },
    SourceTable {
        name: SourceName::ExternalApi,
        table: "external_api_data",
        id_column: "external_id",
        columns: &["title", "authors", "year", "journal", "citations", "doi"],
    },
];

/// One raw row as read from a source table.
///
/// Values are kept as text exactly as stored; only non-null columns are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub source: SourceName,
    pub native_id: String,
    pub fields: BTreeMap<String, String>,
}

impl SourceRecord {
    pub fn new(source: SourceName, native_id: impl Into<String>) -> Self {
        Self {
            source,
            native_id: native_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style setter, mostly for fixtures and tests.
    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.fields.insert(column.to_string(), value.into());
        self
    }

    /// Text for `field`: the first backing column whose value is non-blank.
    ///
    /// Blank means empty after trimming spaces, mirroring `BTRIM` in SQL.
    pub fn field_text(&self, field: Field) -> Option<&str> {
        self.field_values(field).next()
    }

    /// Every non-blank value backing `field`, in priority order.
    pub fn field_values(&self, field: Field) -> impl Iterator<Item = &str> + '_ {
        self.source
            .table()
            .columns_for(field)
            .into_iter()
            .filter_map(|col| self.fields.get(col))
            .map(|v| v.trim_matches(' '))
            .filter(|v| !v.is_empty())
    }

    pub fn year(&self) -> Option<i32> {
        self.field_text(Field::Year).and_then(parse_year)
    }

    pub fn citations(&self) -> u64 {
        self.field_text(Field::Citations)
            .map(parse_citations)
            .unwrap_or(0)
    }
}

/// Extract the first 4-digit year, e.g. `"2019-05-01"` -> 2019.
pub fn parse_year(text: &str) -> Option<i32> {
    YEAR_RE.find(text).and_then(|m| m.as_str().parse().ok())
}

/// Coerce raw citation text to a non-negative count; non-numeric text is 0.
pub fn parse_citations(text: &str) -> u64 {
    if !CITATION_RE.is_match(text) {
        return 0;
    }
    text.split('.')
        .next()
        .and_then(|whole| whole.parse().ok())
        .unwrap_or(0)
}
