//! In-process store.
//!
//! Evaluates the same [`Predicate`] the Postgres renderer emits, over rows held
//! in memory. Loaded from a JSON fixtures file for `serve --fixtures`, and used
//! as the test double for the executor: individual sources can be made to fail
//! or to answer slowly.
//!
//! Fixture layout, keyed by source or table name:
//!
//! ```json
//! {
//!   "openalex": [{"id": "W1", "title": "Graphene", "author": ["A. Geim"], "year": 2010}],
//!   "crossref_data_multiple_subjects": [{"id": 7, "title": "...", "citation_count": "12"}]
//! }
//! ```

use super::{record_order, SearchBackend};
use crate::error::{Result, SearchError};
use crate::query::Predicate;
use crate::sources::{SourceName, SourceRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: HashMap<SourceName, Vec<SourceRecord>>,
    failing: HashSet<SourceName>,
    delays: HashMap<SourceName, Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = SourceRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    pub fn insert(&mut self, record: SourceRecord) {
        self.records.entry(record.source).or_default().push(record);
    }

    /// Every call against `source` fails with a database error.
    pub fn fail_source(mut self, source: SourceName) -> Self {
        self.failing.insert(source);
        self
    }

    /// Every call against `source` sleeps for `delay` first.
    pub fn delay_source(mut self, source: SourceName, delay: Duration) -> Self {
        self.delays.insert(source, delay);
        self
    }

    /// Load rows from a JSON fixtures file.
    pub fn from_fixtures(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            rows = store.len(),
            "Loaded fixtures"
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let parsed: BTreeMap<String, Vec<serde_json::Map<String, Value>>> =
            serde_json::from_str(raw)?;

        let mut store = Self::new();
        for (key, rows) in parsed {
            let source = key
                .parse::<SourceName>()
                .map_err(|_| SearchError::Config(format!("Unknown source in fixtures: {}", key)))?;
            let table = source.table();
            for row in rows {
                // A missing or null id is a NULL key in SQL, which never matches
                let Some(native_id) = row.get(table.id_column).and_then(value_to_string) else {
                    debug!(source = %source, "Skipping fixture row without an id");
                    continue;
                };
                let mut record = SourceRecord::new(source, native_id);
                for col in table.columns {
                    if let Some(value) = row.get(*col).and_then(value_to_string) {
                        record.fields.insert(col.to_string(), value);
                    }
                }
                store.insert(record);
            }
        }
        Ok(store)
    }

    /// Total rows across all sources.
    pub fn len(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn enter(&self, source: SourceName) -> Result<()> {
        if let Some(delay) = self.delays.get(&source) {
            tokio::time::sleep(*delay).await;
        }
        if self.failing.contains(&source) {
            return Err(SearchError::Database(sqlx::Error::Protocol(format!(
                "simulated failure for {}",
                source
            ))));
        }
        Ok(())
    }

    fn matching<'a>(
        &'a self,
        source: SourceName,
        predicate: &'a Predicate,
    ) -> impl Iterator<Item = &'a SourceRecord> + 'a {
        self.records
            .get(&source)
            .into_iter()
            .flatten()
            .filter(move |record| predicate.matches(record))
    }
}

/// Render a JSON cell the way Postgres renders a column cast to text.
///
/// Arrays of names are joined with ", " so author lists parse like a text column.
fn value_to_string(val: &Value) -> Option<String> {
    match val {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(value_to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
        Value::Object(_) => Some(val.to_string()),
    }
}

#[async_trait]
impl SearchBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn fetch(
        &self,
        source: SourceName,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<SourceRecord>> {
        self.enter(source).await?;
        let mut rows: Vec<SourceRecord> = self.matching(source, predicate).cloned().collect();
        rows.sort_by(record_order);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn count(&self, source: SourceName, predicate: &Predicate) -> Result<u64> {
        self.enter(source).await?;
        Ok(self.matching(source, predicate).count() as u64)
    }

    async fn fetch_one(&self, source: SourceName, native_id: &str) -> Result<Option<SourceRecord>> {
        self.enter(source).await?;
        Ok(self
            .records
            .get(&source)
            .and_then(|rows| rows.iter().find(|r| r.native_id == native_id))
            .cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIXTURES: &str = r#"{
        "openalex": [
            {"id": "W2", "title": "Graphene", "author": ["A. Geim", "K. Novoselov"], "year": 2010, "citations": 120},
            {"id": "W1", "title": "Graphite", "author": "B. Old", "year": "2001-01-01", "citations": null}
        ],
        "external_api_data": [
            {"external_id": 99, "title": "Imported", "authors": "C. Doe", "year": 2022}
        ]
    }"#;

    #[test]
    fn test_from_json_casts_cells_to_text() {
        let store = MemoryStore::from_json(FIXTURES).expect("fixtures parse");
        assert_eq!(store.len(), 3);

        let openalex = &store.records[&SourceName::OpenAlex];
        assert_eq!(openalex[0].fields["author"], "A. Geim, K. Novoselov");
        assert_eq!(openalex[0].fields["year"], "2010");
        assert!(!openalex[1].fields.contains_key("citations"));

        let external = &store.records[&SourceName::ExternalApi];
        assert_eq!(external[0].native_id, "99");
    }

    #[test]
    fn test_rows_without_id_are_dropped() {
        let store = MemoryStore::from_json(
            r#"{"openalex": [
                {"title": "No id"},
                {"id": null, "title": "Null id"},
                {"id": "", "title": "Empty id"}
            ]}"#,
        )
        .expect("fixtures parse");
        // Only the empty string survives, as it would in SQL
        assert_eq!(store.len(), 1);
        assert_eq!(store.records[&SourceName::OpenAlex][0].native_id, "");
    }

    #[tokio::test]
    async fn test_book_rows_match_subject_and_isbn() {
        use crate::query::{build_predicate, IdentifierType, SearchFilters};

        let store = MemoryStore::from_json(
            r#"{"scopus": [
                {"id": 1, "book_title": "Handbook", "publisher": "Springer", "asjc": "Physics", "p_isbn": "9783161484100"},
                {"id": 2, "book_title": "Atlas", "publisher": "Elsevier", "asjc": "Geology"}
            ]}"#,
        )
        .expect("fixtures parse");
        let table = SourceName::Scopus.table();

        let text = SearchFilters {
            text: Some("physics".into()),
            ..Default::default()
        };
        let predicate = build_predicate(table, &text);
        assert_eq!(store.count(SourceName::Scopus, &predicate).await.expect("count"), 1);

        let isbn = SearchFilters {
            identifier_types: [IdentifierType::Isbn].into_iter().collect(),
            ..Default::default()
        };
        let rows = store
            .fetch(SourceName::Scopus, &build_predicate(table, &isbn), 10)
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].native_id, "1");

        let author = SearchFilters {
            author: Some("elsevier".into()),
            ..Default::default()
        };
        let predicate = build_predicate(table, &author);
        assert_eq!(store.count(SourceName::Scopus, &predicate).await.expect("count"), 1);
    }

    #[test]
    fn test_unknown_fixture_source_is_rejected() {
        let err = MemoryStore::from_json(r#"{"pubmed": []}"#).err();
        assert!(matches!(err, Some(SearchError::Config(_))));
    }

    #[test]
    fn test_from_fixtures_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(FIXTURES.as_bytes()).expect("write fixtures");
        let store = MemoryStore::from_fixtures(file.path()).expect("load");
        assert!(!store.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_orders_and_limits() {
        let store = MemoryStore::from_json(FIXTURES).expect("fixtures parse");
        let rows = store
            .fetch(SourceName::OpenAlex, &Predicate::Always, 1)
            .await
            .expect("fetch");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].native_id, "W2");
        assert_eq!(
            store.count(SourceName::OpenAlex, &Predicate::Always).await.expect("count"),
            2
        );
    }

    #[tokio::test]
    async fn test_failing_source() {
        let store = MemoryStore::from_json(FIXTURES)
            .expect("fixtures parse")
            .fail_source(SourceName::OpenAlex);
        assert!(store.fetch(SourceName::OpenAlex, &Predicate::Always, 5).await.is_err());
        assert!(store.count(SourceName::ExternalApi, &Predicate::Always).await.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_one() {
        let store = MemoryStore::from_json(FIXTURES).expect("fixtures parse");
        let found = store.fetch_one(SourceName::OpenAlex, "W1").await.expect("lookup");
        assert_eq!(found.map(|r| r.native_id), Some("W1".to_string()));
        assert!(store
            .fetch_one(SourceName::OpenAlex, "missing")
            .await
            .expect("lookup")
            .is_none());
    }
}
