//! Federated executor.
//!
//! Fans one [`QueryPlan`] out across its sources concurrently. Each source runs
//! its page fetch and its count together under the per-source timeout. The
//! futures are joined in place, never spawned, so dropping the caller's future
//! cancels every in-flight query.
//!
//! Pagination is an exact top-N merge: every source returns its first
//! `page * per_page` rows in [`record_order`], and the merged, deduplicated
//! list is sliced to the requested window.

use crate::error::{Result, SearchError};
use crate::query::{QueryPlan, SearchRequest};
use crate::sources::{SourceName, SourceRecord};
use crate::store::{record_order, SearchBackend};
use futures::future::{join_all, try_join};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rows for one page plus the bookkeeping the response needs.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Raw rows of the requested window, in combined order
    pub records: Vec<SourceRecord>,
    /// Matching rows across the sources that answered
    pub total: u64,
    /// Sources that failed or timed out, in plan order
    pub failed_sources: Vec<SourceName>,
}

impl ExecutionResult {
    pub fn partial(&self) -> bool {
        !self.failed_sources.is_empty()
    }
}

/// Runs query plans against a [`SearchBackend`].
pub struct FederatedExecutor {
    backend: Arc<dyn SearchBackend>,
    source_timeout: Duration,
}

impl FederatedExecutor {
    pub fn new(backend: Arc<dyn SearchBackend>, source_timeout: Duration) -> Self {
        Self {
            backend,
            source_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    /// Execute `plan` for the window described by `request`.
    ///
    /// Fails with `SourceUnavailable` only when every planned source failed.
    pub async fn execute(&self, plan: &QueryPlan, request: &SearchRequest) -> Result<ExecutionResult> {
        let limit = request.window_end();
        info!(
            sources = plan.sources.len(),
            page = request.page,
            per_page = request.per_page,
            "Running federated search"
        );

        let futures: Vec<_> = plan
            .sources
            .iter()
            .map(|(source, predicate)| async move {
                let work = try_join(
                    self.backend.fetch(*source, predicate, limit),
                    self.backend.count(*source, predicate),
                );
                let outcome = match tokio::time::timeout(self.source_timeout, work).await {
                    Ok(Ok(answer)) => Ok(answer),
                    Ok(Err(e)) => {
                        warn!(source = %source, error = %e, "Source query failed");
                        Err(e)
                    }
                    Err(_) => {
                        warn!(
                            source = %source,
                            timeout_secs = self.source_timeout.as_secs_f64(),
                            "Source query timed out"
                        );
                        Err(SearchError::Timeout(self.source_timeout.as_secs()))
                    }
                };
                (*source, outcome)
            })
            .collect();

        let outcomes = join_all(futures).await;

        let mut result = ExecutionResult::default();
        let mut rows = Vec::new();
        for (source, outcome) in outcomes {
            match outcome {
                Ok((mut fetched, count)) => {
                    debug!(source = %source, rows = fetched.len(), total = count, "Source answered");
                    result.total += count;
                    rows.append(&mut fetched);
                }
                Err(_) => result.failed_sources.push(source),
            }
        }

        if !plan.sources.is_empty() && result.failed_sources.len() == plan.sources.len() {
            let names: Vec<&str> = result.failed_sources.iter().map(|s| s.as_str()).collect();
            return Err(SearchError::SourceUnavailable(names.join(", ")));
        }

        result.records = merge_window(rows, request.offset(), limit);
        info!(
            total = result.total,
            returned = result.records.len(),
            failed = result.failed_sources.len(),
            "Federated search complete"
        );
        Ok(result)
    }
}

/// Sort, drop repeated `(source, native_id)` pairs and slice `[offset, end)`.
fn merge_window(mut rows: Vec<SourceRecord>, offset: usize, end: usize) -> Vec<SourceRecord> {
    rows.sort_by(record_order);
    let mut seen = HashSet::new();
    rows.retain(|r| seen.insert((r.source, r.native_id.clone())));
    rows.into_iter()
        .skip(offset)
        .take(end.saturating_sub(offset))
        .collect()
}
