//! Service configuration loaded from environment variables.

use crate::error::{Result, SearchError};
use crate::sources::SourceName;
use std::str::FromStr;
use std::time::Duration;

/// Runtime knobs for the pool, the executor and the cache.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string; `None` is only valid with a fixtures file
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    /// Ceiling for one source's fetch + count
    pub source_timeout: Duration,
    /// Ceiling for a whole search request
    pub request_timeout: Duration,
    /// Zero disables the result cache
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    /// Deepest row (`page * per_page`) a caller may page to
    pub max_result_window: usize,
    pub enabled_sources: Vec<SourceName>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            db_acquire_timeout: Duration::from_secs(5),
            source_timeout: Duration::from_secs(8),
            request_timeout: Duration::from_secs(20),
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            max_result_window: 10_000,
            enabled_sources: SourceName::ALL.to_vec(),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let enabled_sources = match var("BIBLIO_SOURCES") {
            Some(list) => parse_sources(&list)?,
            None => defaults.enabled_sources,
        };

        let config = Self {
            database_url: var("DATABASE_URL"),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", var("DB_MAX_CONNECTIONS"), defaults.db_max_connections)?,
            db_acquire_timeout: secs_or("DB_ACQUIRE_TIMEOUT_SECS", var("DB_ACQUIRE_TIMEOUT_SECS"), defaults.db_acquire_timeout)?,
            source_timeout: secs_or("SOURCE_TIMEOUT_SECS", var("SOURCE_TIMEOUT_SECS"), defaults.source_timeout)?,
            request_timeout: secs_or("REQUEST_TIMEOUT_SECS", var("REQUEST_TIMEOUT_SECS"), defaults.request_timeout)?,
            cache_ttl: secs_or("CACHE_TTL_SECS", var("CACHE_TTL_SECS"), defaults.cache_ttl)?,
            cache_max_entries: parse_or("CACHE_MAX_ENTRIES", var("CACHE_MAX_ENTRIES"), defaults.cache_max_entries)?,
            max_result_window: parse_or("MAX_RESULT_WINDOW", var("MAX_RESULT_WINDOW"), defaults.max_result_window)?,
            enabled_sources,
        };

        if config.db_max_connections == 0 {
            return Err(SearchError::Config("DB_MAX_CONNECTIONS must be at least 1".into()));
        }
        if config.source_timeout.is_zero() || config.request_timeout.is_zero() {
            return Err(SearchError::Config("timeouts must be at least 1 second".into()));
        }
        if config.max_result_window == 0 {
            return Err(SearchError::Config("MAX_RESULT_WINDOW must be at least 1".into()));
        }

        Ok(config)
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| SearchError::Config(format!("{} is not a valid number: '{}'", key, raw))),
        None => Ok(default),
    }
}

fn secs_or(key: &str, raw: Option<String>, default: Duration) -> Result<Duration> {
    parse_or(key, raw, default.as_secs()).map(Duration::from_secs)
}

fn parse_sources(list: &str) -> Result<Vec<SourceName>> {
    let mut sources = Vec::new();
    for item in list.split(',').filter(|s| !s.trim().is_empty()) {
        let name = item
            .parse::<SourceName>()
            .map_err(|_| SearchError::Config(format!("BIBLIO_SOURCES names unknown source '{}'", item.trim())))?;
        if !sources.contains(&name) {
            sources.push(name);
        }
    }
    if sources.is_empty() {
        return Err(SearchError::Config("BIBLIO_SOURCES enables no sources".into()));
    }
    Ok(sources)
}
