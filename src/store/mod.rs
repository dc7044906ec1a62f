//! Storage backends for the federated executor.
//!
//! - [`postgres`] - sqlx-backed store over the real source tables
//! - [`memory`] - in-process store over fixture rows, also used as a test double

pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::query::Predicate;
use crate::sources::{SourceName, SourceRecord};
use async_trait::async_trait;
use std::cmp::Ordering;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read access to the bibliographic source tables.
///
/// `fetch` and `count` take the same predicate so a page and its total always
/// agree on which rows qualify.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short backend label for logs and health output
    fn name(&self) -> &'static str;

    /// First `limit` matching rows of `source`, in [`record_order`].
    async fn fetch(
        &self,
        source: SourceName,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<SourceRecord>>;

    /// Number of rows of `source` matching `predicate`.
    async fn count(&self, source: SourceName, predicate: &Predicate) -> Result<u64>;

    /// One row by its native id.
    async fn fetch_one(&self, source: SourceName, native_id: &str) -> Result<Option<SourceRecord>>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<()>;
}

/// The combined result ordering: year descending with missing years last, then
/// native id in byte order, then source name.
pub fn record_order(a: &SourceRecord, b: &SourceRecord) -> Ordering {
    let by_year = match (a.year(), b.year()) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_year
        .then_with(|| a.native_id.as_bytes().cmp(b.native_id.as_bytes()))
        .then_with(|| a.source.as_str().cmp(b.source.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_order() {
        let newer = SourceRecord::new(SourceName::Crossref, "b").with("year", "2021");
        let older = SourceRecord::new(SourceName::Crossref, "a").with("year", "2019");
        let undated = SourceRecord::new(SourceName::Crossref, "0");
        let same_year = SourceRecord::new(SourceName::Crossref, "B").with("year", "2021");
        let other_source = SourceRecord::new(SourceName::Bibliometric, "b").with("year", "2021");

        let mut rows = vec![
            undated.clone(),
            older.clone(),
            newer.clone(),
            same_year.clone(),
            other_source.clone(),
        ];
        rows.sort_by(record_order);
        // "B" < "b" in byte order; bibliometric < crossref on a full tie
        assert_eq!(rows, vec![same_year, other_source, newer, older, undated]);
    }
}
