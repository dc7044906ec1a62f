//! PostgreSQL store.
//!
//! Every source table lives in one database. Predicates are rendered into a
//! `QueryBuilder<Postgres>`; user values only ever travel as bind parameters.
//! Column and table names come from the static catalog and are quoted.
//!
//! Canonical fields are SQL expressions over the raw columns, in priority order:
//!
//! ```sql
//! COALESCE(NULLIF(BTRIM(CAST("cited_by" AS TEXT)), ''), NULLIF(BTRIM(CAST("citations" AS TEXT)), ''))
//! ```
//!
//! Substring filters instead test each backing column on its own, OR'd
//! together, so a hit on any of them counts.
//!
//! The year and citation coercions use the same patterns as
//! [`parse_year`](crate::sources::parse_year) and
//! [`parse_citations`](crate::sources::parse_citations), so ordering and
//! filtering agree with the in-process merge.

use super::SearchBackend;
use crate::config::Config;
use crate::error::{Result, SearchError};
use crate::query::Predicate;
use crate::sources::{Field, SourceName, SourceRecord, SourceTable, CITATION_PATTERN, YEAR_PATTERN};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};

const NATIVE_ID: &str = "native_id";

/// sqlx pool over the bibliographic database
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect using the pool settings from `config`.
    pub async fn connect(config: &Config) -> Result<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| SearchError::Config("DATABASE_URL is not set".into()))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.db_acquire_timeout)
            .connect(url)
            .await?;

        info!(
            max_connections = config.db_max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SearchBackend for PgStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn fetch(
        &self,
        source: SourceName,
        predicate: &Predicate,
        limit: usize,
    ) -> Result<Vec<SourceRecord>> {
        let table = source.table();
        let mut qb = fetch_query(table, predicate, limit);
        debug!(source = %source, sql = qb.sql(), "Fetching rows");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(|row| read_record(table, row)).collect()
    }

    async fn count(&self, source: SourceName, predicate: &Predicate) -> Result<u64> {
        let mut qb = count_query(source.table(), predicate);
        let total: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn fetch_one(&self, source: SourceName, native_id: &str) -> Result<Option<SourceRecord>> {
        let table = source.table();
        let mut qb = select_columns(table);
        qb.push(" WHERE CAST(");
        qb.push(quote(table.id_column));
        qb.push(" AS TEXT) = ");
        qb.push_bind(native_id.to_string());
        qb.push(" LIMIT 1");

        let row = qb.build().fetch_optional(&self.pool).await?;
        row.map(|row| read_record(table, &row)).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ============================================================================
// SQL rendering
// ============================================================================

fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// `%needle%` with LIKE metacharacters escaped for `ESCAPE '\'`.
pub fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Chosen text for `field`, or `None` when the table has no backing column.
fn field_expr(table: &SourceTable, field: Field) -> Option<String> {
    let columns = table.columns_for(field);
    if columns.is_empty() {
        return None;
    }
    let parts: Vec<String> = columns
        .iter()
        .map(|col| format!("NULLIF(BTRIM(CAST({} AS TEXT)), '')", quote(col)))
        .collect();
    Some(if parts.len() == 1 {
        parts.join("")
    } else {
        format!("COALESCE({})", parts.join(", "))
    })
}

fn year_expr(table: &SourceTable) -> String {
    match field_expr(table, Field::Year) {
        Some(text) => format!("CAST(substring({} FROM '{}') AS INTEGER)", text, YEAR_PATTERN),
        None => "CAST(NULL AS INTEGER)".to_string(),
    }
}

fn citations_expr(table: &SourceTable) -> String {
    match field_expr(table, Field::Citations) {
        Some(text) => format!(
            "(CASE WHEN {text} ~ '{pattern}' THEN CAST(floor(CAST({text} AS NUMERIC)) AS BIGINT) ELSE 0 END)",
            text = text,
            pattern = CITATION_PATTERN
        ),
        None => "CAST(0 AS BIGINT)".to_string(),
    }
}

fn push_predicate(qb: &mut QueryBuilder<'_, Postgres>, table: &SourceTable, predicate: &Predicate) {
    match predicate {
        Predicate::Always => {
            qb.push("TRUE");
        }
        Predicate::Never => {
            qb.push("FALSE");
        }
        Predicate::And(parts) | Predicate::Or(parts) => {
            let joiner = if matches!(predicate, Predicate::And(_)) {
                " AND "
            } else {
                " OR "
            };
            qb.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    qb.push(joiner);
                }
                push_predicate(qb, table, part);
            }
            qb.push(")");
        }
        Predicate::Contains { field, needle } => {
            let columns = table.columns_for(*field);
            if columns.is_empty() {
                qb.push("FALSE");
                return;
            }
            let pattern = like_pattern(needle);
            qb.push("(");
            for (i, col) in columns.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                qb.push(format!("CAST({} AS TEXT) ILIKE ", quote(col)));
                qb.push_bind(pattern.clone());
                qb.push(" ESCAPE '\\'");
            }
            qb.push(")");
        }
        Predicate::YearRange { from, to } => {
            let year = year_expr(table);
            qb.push(format!("({} IS NOT NULL", year));
            if let Some(from) = from {
                qb.push(format!(" AND {} >= ", year));
                qb.push_bind(*from);
            }
            if let Some(to) = to {
                qb.push(format!(" AND {} <= ", year));
                qb.push_bind(*to);
            }
            qb.push(")");
        }
        Predicate::MinCitations(min) => {
            qb.push(format!("{} >= ", citations_expr(table)));
            qb.push_bind(i64::try_from(*min).unwrap_or(i64::MAX));
        }
        Predicate::Present(field) => match field_expr(table, *field) {
            Some(expr) => {
                qb.push(format!("{} IS NOT NULL", expr));
            }
            None => {
                qb.push("FALSE");
            }
        },
    }
}

/// WHERE clause shared by the page and count queries.
fn push_where(qb: &mut QueryBuilder<'_, Postgres>, table: &SourceTable, predicate: &Predicate) {
    qb.push(format!(" WHERE {} IS NOT NULL AND ", quote(table.id_column)));
    push_predicate(qb, table, predicate);
}

fn select_columns(table: &SourceTable) -> QueryBuilder<'static, Postgres> {
    let mut sql = format!(
        "SELECT CAST({} AS TEXT) AS {}",
        quote(table.id_column),
        NATIVE_ID
    );
    for col in table.columns {
        sql.push_str(&format!(", CAST({col} AS TEXT) AS {col}", col = quote(col)));
    }
    sql.push_str(&format!(" FROM {}", quote(table.table)));
    QueryBuilder::new(sql)
}

pub(crate) fn fetch_query(
    table: &SourceTable,
    predicate: &Predicate,
    limit: usize,
) -> QueryBuilder<'static, Postgres> {
    let mut qb = select_columns(table);
    push_where(&mut qb, table, predicate);
    qb.push(format!(
        " ORDER BY {} DESC NULLS LAST, CAST({} AS TEXT) COLLATE \"C\" ASC LIMIT ",
        year_expr(table),
        quote(table.id_column)
    ));
    qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    qb
}

pub(crate) fn count_query(table: &SourceTable, predicate: &Predicate) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", quote(table.table)));
    push_where(&mut qb, table, predicate);
    qb
}

fn read_record(table: &SourceTable, row: &PgRow) -> Result<SourceRecord> {
    let native_id: Option<String> = row.try_get(NATIVE_ID)?;
    let mut record = SourceRecord::new(table.name, native_id.unwrap_or_default());
    for col in table.columns {
        let value: Option<String> = row.try_get(*col)?;
        if let Some(value) = value {
            record.fields.insert(col.to_string(), value);
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{build_predicate, IdentifierType, SearchFilters};

    fn where_clause(sql: &str) -> &str {
        let start = sql.find(" WHERE ").expect("has WHERE");
        let end = sql.find(" ORDER BY ").unwrap_or(sql.len());
        &sql[start..end]
    }

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("deep learning"), "%deep learning%");
        assert_eq!(like_pattern("100%_a\\b"), "%100\\%\\_a\\\\b%");
    }

    #[test]
    fn test_field_expr_follows_priority() {
        let expr = field_expr(SourceName::OpenAlex.table(), Field::Title).expect("title");
        assert_eq!(expr, "NULLIF(BTRIM(CAST(\"title\" AS TEXT)), '')");
        let expr = field_expr(SourceName::OpenAlex.table(), Field::Venue).expect("venue");
        assert_eq!(
            expr,
            "COALESCE(NULLIF(BTRIM(CAST(\"journal\" AS TEXT)), ''), NULLIF(BTRIM(CAST(\"subject\" AS TEXT)), ''))"
        );
        let expr = field_expr(SourceName::Scopus.table(), Field::Author).expect("author");
        assert_eq!(expr, "NULLIF(BTRIM(CAST(\"publisher\" AS TEXT)), '')");
        assert!(field_expr(SourceName::CleanedBibliometric.table(), Field::Venue).is_none());
    }

    #[test]
    fn test_count_and_page_share_where_clause() {
        let filters = SearchFilters {
            text: Some("graphene".into()),
            year_from: Some(2000),
            min_citations: Some(3),
            ..Default::default()
        };
        for name in [SourceName::OpenAlex, SourceName::Crossref, SourceName::GoogleScholar] {
            let table = name.table();
            let predicate = build_predicate(table, &filters);
            let fetch = fetch_query(table, &predicate, 40);
            let count = count_query(table, &predicate);
            assert_eq!(where_clause(fetch.sql()), where_clause(count.sql()));
        }
    }

    #[test]
    fn test_user_text_only_travels_as_binds() {
        let filters = SearchFilters {
            text: Some("title' OR '1'='1".into()),
            author: Some("x\"; DROP TABLE openalex_data; --".into()),
            ..Default::default()
        };
        let table = SourceName::OpenAlex.table();
        let predicate = build_predicate(table, &filters);
        let sql = fetch_query(table, &predicate, 10).sql().to_string();

        assert!(!sql.contains("'1'='1"));
        assert!(!sql.contains("DROP TABLE"));
        assert!(sql.contains("ILIKE $1"));
        assert!(sql.contains("LIMIT $"));
    }

    #[test]
    fn test_fetch_query_shape() {
        let table = SourceName::ExternalApi.table();
        let sql = fetch_query(table, &Predicate::Always, 20).sql().to_string();
        assert!(sql.starts_with("SELECT CAST(\"external_id\" AS TEXT) AS native_id"));
        assert!(sql.contains("FROM \"external_api_data\" WHERE \"external_id\" IS NOT NULL AND TRUE"));
        assert!(sql.contains("DESC NULLS LAST"));
        assert!(sql.contains("COLLATE \"C\" ASC"));
    }

    #[test]
    fn test_contains_tests_every_backing_column() {
        let table = SourceName::Scopus.table();
        let predicate = Predicate::Contains {
            field: Field::Venue,
            needle: "physics".into(),
        };
        let count = count_query(table, &predicate);
        assert!(count.sql().ends_with(
            "(CAST(\"publisher\" AS TEXT) ILIKE $1 ESCAPE '\\' OR CAST(\"asjc\" AS TEXT) ILIKE $2 ESCAPE '\\')"
        ));
    }

    #[test]
    fn test_present_renders_not_null_check() {
        let table = SourceName::OpenAlex.table();
        let count = count_query(table, &Predicate::Present(Field::Doi));
        assert!(count
            .sql()
            .ends_with("NULLIF(BTRIM(CAST(\"doi\" AS TEXT)), '') IS NOT NULL"));
    }

    #[test]
    fn test_doi_filter_accepts_column_or_identifiers() {
        let filters = SearchFilters {
            identifier_types: [IdentifierType::Doi].into_iter().collect(),
            ..Default::default()
        };
        let table = SourceName::OpenAlex.table();
        let count = count_query(table, &build_predicate(table, &filters));
        assert!(count.sql().ends_with(
            "(NULLIF(BTRIM(CAST(\"doi\" AS TEXT)), '') IS NOT NULL OR (CAST(\"identifiers\" AS TEXT) ILIKE $1 ESCAPE '\\'))"
        ));
    }

    #[test]
    fn test_year_range_with_one_bound() {
        let table = SourceName::Crossref.table();
        let year = year_expr(table);

        let from_only = count_query(table, &Predicate::YearRange { from: Some(2000), to: None });
        assert!(from_only
            .sql()
            .ends_with(&format!("({year} IS NOT NULL AND {year} >= $1)", year = year)));

        let to_only = count_query(table, &Predicate::YearRange { from: None, to: Some(2010) });
        assert!(to_only
            .sql()
            .ends_with(&format!("({year} IS NOT NULL AND {year} <= $1)", year = year)));
    }

    #[test]
    fn test_source_without_citations_renders_constant() {
        let table = SourceName::Scopus.table();
        let count = count_query(table, &Predicate::MinCitations(1));
        assert!(count.sql().contains("CAST(0 AS BIGINT) >= $1"));
    }
}
