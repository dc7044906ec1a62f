//! # biblio-search
//!
//! Federated bibliometric search over heterogeneous PostgreSQL source tables - Rust Microservice
//!
//! ## Modules
//!
//! - [`sources`] - Source catalog and canonical field mapping
//! - [`query`] - Parameter validation and per-source predicates
//! - [`store`] - Postgres and in-memory backends
//! - [`executor`] - Concurrent fan-out and top-N merge
//! - [`normalize`] - Raw rows to canonical results
//! - [`metrics`] - Bibliometric summary
//! - [`service`] - Request pipeline with cache and deadline
//! - [`http`] - axum API
//! - [`config`] - Environment configuration
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use biblio_search::{config::Config, query::SearchParams, service::SearchService, store::PgStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = PgStore::connect(&config).await?;
//!     let service = SearchService::new(Arc::new(store), &config);
//!
//!     let params = SearchParams {
//!         query: Some("machine learning".into()),
//!         ..Default::default()
//!     };
//!     let page = service.search(&service.validate(&params)?).await?;
//!     println!("Found {} results", page.total);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod metrics;
pub mod normalize;
pub mod query;
pub mod service;
pub mod sources;
pub mod store;

pub use error::{Result, SearchError};
