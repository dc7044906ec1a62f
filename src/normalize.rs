//! Raw rows to the canonical result shape.

use crate::error::{Result, SearchError};
use crate::sources::{Field, SourceName, SourceRecord};
use serde::Serialize;
use tracing::warn;

/// Author values that mean "no author" in the legacy dumps
const AUTHOR_SENTINELS: &[&str] = &["n/a", "na", "unknown", "no author data"];

const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// One search hit, identical in shape whatever table it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    /// `<sourceName>:<native id>`
    pub id: String,
    pub title: String,
    pub author: Vec<String>,
    pub year: Option<i32>,
    pub venue: String,
    pub citation_count: u64,
    pub doi: Option<String>,
    pub source_name: SourceName,
}

/// Map one raw row. Fails only when the row has no usable native id.
pub fn normalize(record: &SourceRecord) -> Result<CanonicalResult> {
    let native_id = record.native_id.trim();
    if native_id.is_empty() {
        return Err(SearchError::Normalization {
            source_name: record.source.to_string(),
            message: "row has an empty native id".into(),
        });
    }

    Ok(CanonicalResult {
        id: format!("{}:{}", record.source, native_id),
        title: record
            .field_text(Field::Title)
            .unwrap_or("Untitled")
            .to_string(),
        author: record
            .field_text(Field::Author)
            .map(parse_authors)
            .unwrap_or_default(),
        year: record.year(),
        venue: record
            .field_text(Field::Venue)
            .unwrap_or("Unknown")
            .to_string(),
        citation_count: record.citations(),
        doi: record.field_text(Field::Doi).and_then(clean_doi),
        source_name: record.source,
    })
}

/// Normalize a batch, skipping malformed rows.
///
/// Returns the results in input order and the number of rows skipped.
pub fn normalize_all(records: &[SourceRecord]) -> (Vec<CanonicalResult>, usize) {
    let mut results = Vec::with_capacity(records.len());
    let mut skipped = 0;
    for record in records {
        match normalize(record) {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(error = %e, "Skipping malformed row");
                skipped += 1;
            }
        }
    }
    (results, skipped)
}

/// Split a comma-separated author list, dropping blanks and sentinels.
pub fn parse_authors(text: &str) -> Vec<String> {
    text.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .filter(|name| !AUTHOR_SENTINELS.contains(&name.to_lowercase().as_str()))
        .map(str::to_string)
        .collect()
}

/// Strip resolver prefixes from a DOI; blank becomes `None`.
pub fn clean_doi(text: &str) -> Option<String> {
    let mut doi = text.trim();
    for prefix in DOI_PREFIXES {
        let head = doi.get(..prefix.len());
        if head.is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            doi = doi[prefix.len()..].trim();
            break;
        }
    }
    if doi.is_empty() {
        None
    } else {
        Some(doi.to_string())
    }
}
