//! biblio-search - Federated bibliometric search service
//!
//! Searches several bibliographic source tables in one PostgreSQL database,
//! normalizes the rows into one shape and derives summary metrics.
//!
//! ## Usage
//!
//! ### CLI Mode
//! ```bash
//! biblio-search search "machine learning" --year-from 2018 --output page.csv
//! ```
//!
//! ### HTTP Server Mode
//! ```bash
//! DATABASE_URL=postgres://localhost/biblio biblio-search serve --port 3000
//! ```

use anyhow::{Context, Result};
use biblio_search::{
    config::Config,
    http,
    normalize::CanonicalResult,
    query::SearchParams,
    service::SearchService,
    store::{MemoryStore, PgStore, SearchBackend},
};
use chrono::{Datelike, Local};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Federated bibliometric search service
#[derive(Parser)]
#[command(name = "biblio-search")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one search and print the page with its metrics
    Search {
        /// Free-text query (may be empty when filters are given)
        query: Option<String>,

        /// Page number, starting at 1
        #[arg(long)]
        page: Option<u32>,

        /// Results per page (1-100)
        #[arg(long)]
        per_page: Option<u32>,

        /// Author substring
        #[arg(long)]
        author: Option<String>,

        /// Title substring
        #[arg(long)]
        title: Option<String>,

        /// Journal / venue substring
        #[arg(long)]
        journal: Option<String>,

        /// Publisher substring
        #[arg(long)]
        publisher: Option<String>,

        /// Earliest publication year (inclusive)
        #[arg(long)]
        year_from: Option<i32>,

        /// Latest publication year (inclusive)
        #[arg(long)]
        year_to: Option<i32>,

        /// Minimum citation count
        #[arg(long)]
        min_citations: Option<u64>,

        /// Required identifier types (e.g., "doi,arxiv")
        #[arg(long)]
        identifier_types: Option<String>,

        /// Restrict to these sources (e.g., "openalex,crossref")
        #[arg(long)]
        sources: Option<String>,

        /// Write the page to this CSV file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Search a JSON fixtures file instead of PostgreSQL
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },

    /// Run as HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Serve a JSON fixtures file instead of PostgreSQL
        #[arg(long)]
        fixtures: Option<PathBuf>,
    },

    /// List the enabled source tables
    Sources,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Search {
            query,
            page,
            per_page,
            author,
            title,
            journal,
            publisher,
            year_from,
            year_to,
            min_citations,
            identifier_types,
            sources,
            output,
            fixtures,
        } => {
            let params = SearchParams {
                query,
                page: page.map(|v| v.to_string()),
                per_page: per_page.map(|v| v.to_string()),
                author,
                title,
                journal,
                publisher,
                year_from: year_from.map(|v| v.to_string()),
                year_to: year_to.map(|v| v.to_string()),
                min_citations: min_citations.map(|v| v.to_string()),
                identifier_types,
                sources,
                ..Default::default()
            };
            let service = build_service(&config, fixtures.as_deref()).await?;
            run_search(&service, &params, output.as_deref()).await
        }
        Commands::Serve {
            port,
            host,
            fixtures,
        } => {
            let service = build_service(&config, fixtures.as_deref()).await?;
            run_server(service, host, port).await
        }
        Commands::Sources => {
            list_sources(&config);
            Ok(())
        }
    }
}

async fn build_service(config: &Config, fixtures: Option<&Path>) -> Result<SearchService> {
    let backend: Arc<dyn SearchBackend> = match fixtures {
        Some(path) => Arc::new(
            MemoryStore::from_fixtures(path)
                .with_context(|| format!("Failed to load fixtures from {}", path.display()))?,
        ),
        None => Arc::new(
            PgStore::connect(config)
                .await
                .context("Failed to connect to PostgreSQL")?,
        ),
    };
    Ok(SearchService::new(backend, config))
}

// ============================================================================
// Search
// ============================================================================

async fn run_search(service: &SearchService, params: &SearchParams, output: Option<&Path>) -> Result<()> {
    let request = service.validate(params)?;
    let response = service.search(&request).await?;
    let metrics = biblio_search::metrics::compute(&response.results, Local::now().year());

    println!(
        "\n--- Page {} ({} per page) of {} matches ---",
        response.page, response.per_page, response.total
    );
    for (i, result) in response.results.iter().enumerate() {
        let year = result.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".into());
        println!(
            "{:>3}. {} ({}) - {} [{} citations] {}",
            request.offset() + i + 1,
            result.title,
            year,
            result.venue,
            result.citation_count,
            result.id
        );
    }
    if response.partial {
        let failed: Vec<&str> = response.failed_sources.iter().map(|s| s.as_str()).collect();
        println!("Partial results: {} did not answer", failed.join(", "));
    }
    if response.skipped_rows > 0 {
        println!("Skipped {} malformed rows", response.skipped_rows);
    }

    println!("\n--- Metrics ---");
    println!(
        "Scholarly works: {}  Works cited: {}  Frequently cited: {}",
        metrics.scholarly_works, metrics.works_cited, metrics.frequently_cited
    );
    for point in &metrics.citation_trends {
        println!("  {}: {} citations", point.year, point.citations);
    }
    for author in &metrics.top_authors {
        println!("  Top author: {} ({} citations)", author.name, author.citations);
    }
    for venue in &metrics.publication_distribution {
        println!("  Venue: {} ({} works)", venue.name, venue.count);
    }

    if let Some(path) = output {
        let rows: Vec<CsvRow> = response.results.iter().map(CsvRow::from).collect();
        save_csv(path, &rows)?;
    }
    Ok(())
}

/// Flat CSV shape of a canonical result
#[derive(Debug, Serialize)]
struct CsvRow {
    id: String,
    title: String,
    author: String,
    year: Option<i32>,
    venue: String,
    citation_count: u64,
    doi: String,
    source_name: String,
}

impl From<&CanonicalResult> for CsvRow {
    fn from(r: &CanonicalResult) -> Self {
        Self {
            id: r.id.clone(),
            title: r.title.clone(),
            author: r.author.join("; "),
            year: r.year,
            venue: r.venue.clone(),
            citation_count: r.citation_count,
            doi: r.doi.clone().unwrap_or_default(),
            source_name: r.source_name.to_string(),
        }
    }
}

/// Save data to CSV file
fn save_csv<T: Serialize>(path: &Path, data: &[T]) -> Result<()> {
    if data.is_empty() {
        println!("No data to save to {:?}", path);
        return Ok(());
    }

    let mut wtr = csv::WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .context("Failed to create CSV writer")?;

    for item in data {
        wtr.serialize(item).context("Failed to write CSV record")?;
    }

    wtr.flush().context("Failed to flush CSV")?;
    println!("Saved: {:?}", path);
    Ok(())
}

fn list_sources(config: &Config) {
    for name in &config.enabled_sources {
        let table = name.table();
        println!(
            "{:<22} {:<34} id={} columns={}",
            name.as_str(),
            table.table,
            table.id_column,
            table.columns.join(",")
        );
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

async fn run_server(service: SearchService, host: String, port: u16) -> Result<()> {
    info!(host = %host, port = port, backend = service.backend_name(), "Starting HTTP server");

    let app = http::router(Arc::new(service));

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .context("Invalid host:port")?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
