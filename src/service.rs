//! Search service: the request pipeline behind both the HTTP API and the CLI.
//!
//! cache lookup → query plan → federated execution → normalization → response,
//! all under one request timeout.

use crate::cache::ResultCache;
use crate::config::Config;
use crate::error::{OptionExt, Result, SearchError};
use crate::executor::FederatedExecutor;
use crate::metrics::{self, MetricsSnapshot};
use crate::normalize::{normalize, normalize_all, CanonicalResult};
use crate::query::{QueryPlan, SearchParams, SearchRequest};
use crate::sources::SourceName;
use crate::store::SearchBackend;
use chrono::{Datelike, Local};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// One page of canonical results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub results: Vec<CanonicalResult>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
    /// Live external API fan-out is not part of this service
    pub external_apis_used: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_sources: Vec<SourceName>,
    #[serde(skip_serializing_if = "is_zero")]
    pub skipped_rows: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

pub struct SearchService {
    executor: FederatedExecutor,
    cache: ResultCache<SearchResponse>,
    enabled_sources: Vec<SourceName>,
    request_timeout: Duration,
    max_result_window: usize,
}

impl SearchService {
    pub fn new(backend: Arc<dyn SearchBackend>, config: &Config) -> Self {
        Self {
            executor: FederatedExecutor::new(backend, config.source_timeout),
            cache: ResultCache::new(config.cache_ttl, config.cache_max_entries),
            enabled_sources: config.enabled_sources.clone(),
            request_timeout: config.request_timeout,
            max_result_window: config.max_result_window,
        }
    }

    pub fn enabled_sources(&self) -> &[SourceName] {
        &self.enabled_sources
    }

    pub fn backend_name(&self) -> &'static str {
        self.executor.backend().name()
    }

    /// Validate raw parameters against this service's configuration.
    pub fn validate(&self, params: &SearchParams) -> Result<SearchRequest> {
        params.validate(&self.enabled_sources, self.max_result_window)
    }

    /// One page of results for `request`.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        if let Some(cached) = self.cache.get(request) {
            return Ok(cached);
        }

        let response = self.with_deadline(self.run_search(request)).await?;
        if !response.partial {
            self.cache.insert(request.clone(), response.clone());
        }
        Ok(response)
    }

    /// Metrics over the page `request` selects.
    pub async fn metrics(&self, request: &SearchRequest) -> Result<MetricsSnapshot> {
        self.metrics_at(request, Local::now().year()).await
    }

    pub async fn metrics_at(&self, request: &SearchRequest, current_year: i32) -> Result<MetricsSnapshot> {
        let response = self.search(request).await?;
        Ok(metrics::compute(&response.results, current_year))
    }

    /// Look up one record by source and native id.
    pub async fn paper_details(&self, source: &str, id: &str) -> Result<CanonicalResult> {
        let source: SourceName = source.parse()?;
        if !self.enabled_sources.contains(&source) {
            return Err(SearchError::Validation(format!("Source is not enabled: {}", source)));
        }
        let id = id.trim();
        if id.is_empty() {
            return Err(SearchError::Validation("id is required".into()));
        }

        let record = self
            .with_deadline(self.executor.backend().fetch_one(source, id))
            .await?
            .ok_or_not_found(&format!("{}:{}", source, id))?;
        normalize(&record)
    }

    pub async fn ping(&self) -> Result<()> {
        self.with_deadline(self.executor.backend().ping()).await
    }

    async fn run_search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let plan = QueryPlan::build(request, &self.enabled_sources);
        let executed = self.executor.execute(&plan, request).await?;
        let (results, skipped_rows) = normalize_all(&executed.records);
        if skipped_rows > 0 {
            warn!(skipped = skipped_rows, "Dropped malformed rows from page");
        }

        info!(
            total = executed.total,
            returned = results.len(),
            partial = executed.partial(),
            "Search complete"
        );

        Ok(SearchResponse {
            results,
            total: executed.total,
            page: request.page,
            per_page: request.per_page,
            external_apis_used: false,
            partial: executed.partial(),
            failed_sources: executed.failed_sources,
            skipped_rows,
        })
    }

    async fn with_deadline<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.request_timeout, work).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout_secs = self.request_timeout.as_secs(), "Request timed out");
                Err(SearchError::Timeout(self.request_timeout.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SearchFilters;
    use crate::sources::SourceRecord;
    use crate::store::MemoryStore;

    fn store() -> MemoryStore {
        MemoryStore::with_records(vec![
            SourceRecord::new(SourceName::OpenAlex, "W1")
                .with("title", "Graphene electronics")
                .with("author", "A. Geim")
                .with("year", "2020")
                .with("citations", "5"),
            SourceRecord::new(SourceName::Crossref, "10.1/a")
                .with("title", "Graphene optics")
                .with("authors", "K. Novoselov")
                .with("year", "2020")
                .with("citation_count", "10"),
            SourceRecord::new(SourceName::Bibliometric, "b1")
                .with("title", "Graphene sensors")
                .with("author_name", "A. Geim")
                .with("year", "2020")
                .with("cited_by", "0"),
            SourceRecord::new(SourceName::Bibliometric, "")
                .with("title", "Graphene without id"),
            SourceRecord::new(SourceName::GoogleScholar, "g1")
                .with("title", "Protein folding")
                .with("author_name", "D. Hassabis")
                .with("year", "2021")
                .with("cited_by", "300"),
        ])
    }

    fn service(store: MemoryStore, config: Config) -> SearchService {
        SearchService::new(Arc::new(store), &config)
    }

    fn text(query: &str) -> SearchRequest {
        let filters = SearchFilters {
            text: Some(query.into()),
            ..Default::default()
        };
        SearchRequest::new(filters, 1, 10)
    }

    #[tokio::test]
    async fn test_search_normalizes_and_counts_skipped() {
        let svc = service(store(), Config::default());
        let response = svc.search(&text("graphene")).await.expect("search");
        assert_eq!(response.total, 4);
        assert_eq!(response.results.len(), 3);
        assert_eq!(response.skipped_rows, 1);
        assert!(!response.partial);
        assert!(!response.external_apis_used);
    }

    #[tokio::test]
    async fn test_metrics_over_page() {
        let svc = service(store(), Config::default());
        let m = svc.metrics_at(&text("graphene"), 2024).await.expect("metrics");
        assert_eq!(m.citation_trends.len(), 1);
        assert_eq!(m.citation_trends[0].year, "2020");
        assert_eq!(m.citation_trends[0].citations, 15);
        assert_eq!(m.scholarly_works, 3);
        assert_eq!(m.top_authors[0].name, "K. Novoselov");
    }

    #[tokio::test]
    async fn test_filters_without_text() {
        let svc = service(store(), Config::default());
        let filters = SearchFilters {
            min_citations: Some(100),
            ..Default::default()
        };
        let response = svc
            .search(&SearchRequest::new(filters, 1, 10))
            .await
            .expect("search");
        let ids: Vec<&str> = response.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["google_scholar:g1"]);
    }

    #[tokio::test]
    async fn test_injection_text_matches_nothing() {
        let svc = service(store(), Config::default());
        let response = svc.search(&text("title' OR '1'='1")).await.expect("search");
        assert!(response.results.is_empty());
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn test_partial_responses_are_not_cached() {
        let svc = service(store().fail_source(SourceName::Crossref), Config::default());
        let response = svc.search(&text("graphene")).await.expect("search");
        assert!(response.partial);
        assert_eq!(response.failed_sources, vec![SourceName::Crossref]);
        assert!(svc.cache.is_empty());

        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(json["partial"], true);
        assert_eq!(json["failed_sources"], serde_json::json!(["crossref"]));
    }

    #[tokio::test]
    async fn test_complete_responses_are_cached() {
        let svc = service(store(), Config::default());
        let first = svc.search(&text("graphene")).await.expect("search");
        assert_eq!(svc.cache.len(), 1);
        let second = svc.search(&text("graphene")).await.expect("search");
        assert_eq!(first, second);

        let json = serde_json::to_value(&first).expect("json");
        assert!(json.get("partial").is_none());
        assert!(json.get("failed_sources").is_none());
    }

    #[tokio::test]
    async fn test_request_deadline_is_timeout_not_unavailable() {
        let config = Config {
            request_timeout: Duration::from_millis(50),
            source_timeout: Duration::from_secs(5),
            ..Config::default()
        };
        let slow = store().delay_source(SourceName::OpenAlex, Duration::from_secs(2));
        let svc = service(slow, config);
        let err = svc.search(&text("graphene")).await.err();
        assert!(matches!(err, Some(SearchError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_every_source_failing_is_unavailable() {
        let config = Config {
            enabled_sources: vec![SourceName::OpenAlex, SourceName::Crossref],
            ..Config::default()
        };
        let failing = store()
            .fail_source(SourceName::OpenAlex)
            .fail_source(SourceName::Crossref);
        let svc = service(failing, config);
        let err = svc.search(&text("graphene")).await.err();
        assert!(matches!(err, Some(SearchError::SourceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_paper_details() {
        let svc = service(store(), Config::default());
        let paper = svc.paper_details("crossref", "10.1/a").await.expect("found");
        assert_eq!(paper.title, "Graphene optics");

        assert!(matches!(
            svc.paper_details("crossref", "nope").await,
            Err(SearchError::NotFound(_))
        ));
        assert!(matches!(
            svc.paper_details("pubmed", "1").await,
            Err(SearchError::Validation(_))
        ));
    }
}
