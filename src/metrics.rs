//! Bibliometric summary over one result set.
//!
//! Pure functions only; the caller supplies the current year so the placeholder
//! trend is reproducible in tests.

use crate::normalize::CanonicalResult;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

/// How many authors / venues the ranked lists keep
pub const TOP_N: usize = 5;

/// Results above this many citations count as frequently cited
pub const FREQUENTLY_CITED_THRESHOLD: u64 = 10;

/// Years covered by the placeholder trend when no result has a year
const PLACEHOLDER_YEARS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrendPoint {
    /// Four-digit year, serialized as a string
    pub year: String,
    pub citations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorCitations {
    pub name: String,
    pub citations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VenueCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub citation_trends: Vec<TrendPoint>,
    pub top_authors: Vec<AuthorCitations>,
    pub publication_distribution: Vec<VenueCount>,
    pub scholarly_works: u64,
    pub works_cited: u64,
    pub frequently_cited: u64,
}

/// Aggregate `results` into a [`MetricsSnapshot`].
pub fn compute(results: &[CanonicalResult], current_year: i32) -> MetricsSnapshot {
    let mut by_year: BTreeMap<i32, u64> = BTreeMap::new();
    let mut by_author: HashMap<&str, u64> = HashMap::new();
    let mut by_venue: HashMap<&str, u64> = HashMap::new();

    for result in results {
        if let Some(year) = result.year {
            *by_year.entry(year).or_default() += result.citation_count;
        }
        // An author listed twice on one work is credited once
        let authors: HashSet<&str> = result.author.iter().map(String::as_str).collect();
        for author in authors {
            *by_author.entry(author).or_default() += result.citation_count;
        }
        *by_venue.entry(result.venue.as_str()).or_default() += 1;
    }

    let citation_trends = if by_year.is_empty() {
        (current_year - PLACEHOLDER_YEARS + 1..=current_year)
            .map(|year| TrendPoint {
                year: year.to_string(),
                citations: 0,
            })
            .collect()
    } else {
        by_year
            .into_iter()
            .map(|(year, citations)| TrendPoint {
                year: year.to_string(),
                citations,
            })
            .collect()
    };

    let top_authors = top_n(by_author)
        .into_iter()
        .map(|(name, citations)| AuthorCitations {
            name: name.to_string(),
            citations,
        })
        .collect();

    let publication_distribution = top_n(by_venue)
        .into_iter()
        .map(|(name, count)| VenueCount {
            name: name.to_string(),
            count,
        })
        .collect();

    MetricsSnapshot {
        citation_trends,
        top_authors,
        publication_distribution,
        scholarly_works: results.len() as u64,
        works_cited: results.iter().map(|r| r.citation_count).sum(),
        frequently_cited: results
            .iter()
            .filter(|r| r.citation_count > FREQUENTLY_CITED_THRESHOLD)
            .count() as u64,
    }
}

/// Highest totals first, ties by name ascending.
fn top_n(totals: HashMap<&str, u64>) -> Vec<(&str, u64)> {
    let mut ranked: Vec<_> = totals.into_iter().collect();
    ranked.sort_by_key(|(name, total)| (Reverse(*total), *name));
    ranked.truncate(TOP_N);
    ranked
}
