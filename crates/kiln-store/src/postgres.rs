//! PostgreSQL job store.

use async_trait::async_trait;
use kiln_core::store::{JobPage, JobStore};
use kiln_core::{AnnotationFilter, Annotations, JobMetadata, JobStatus, MatchRule};
use sqlx::postgres::{PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder};

use crate::{DbError, DbResult};

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    name: String,
    annotations: Json<Annotations>,
    phase: String,
    metadata: Json<JobMetadata>,
}

impl TryFrom<JobRow> for JobStatus {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let phase = row.phase.parse().map_err(|message| DbError::Corrupt {
            name: row.name.clone(),
            message,
        })?;
        Ok(JobStatus {
            name: row.name,
            annotations: row.annotations.0,
            phase,
            metadata: row.metadata.0,
        })
    }
}

/// PostgreSQL implementation of [`JobStore`].
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn upsert(&self, job: &JobStatus) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (name, annotations, phase, metadata, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (name) DO UPDATE SET
                annotations = EXCLUDED.annotations,
                phase = EXCLUDED.phase,
                metadata = EXCLUDED.metadata,
                updated_at = NOW()
            "#,
        )
        .bind(&job.name)
        .bind(Json(&job.annotations))
        .bind(job.phase.as_str())
        .bind(Json(&job.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, name: &str) -> DbResult<JobStatus> {
        let row = sqlx::query_as::<_, JobRow>(
            "SELECT name, annotations, phase, metadata FROM jobs WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("job {}", name)))?;
        row.try_into()
    }

    async fn page(
        &self,
        filters: &[AnnotationFilter],
        start: usize,
        limit: usize,
    ) -> DbResult<JobPage> {
        let (offset, limit) = page_bounds(start, limit)?;
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filters(&mut count, filters);
        let mut select = select_page(filters, offset, limit);

        // One snapshot for both statements keeps `total` consistent with the page.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;
        let total: i64 = count.build_query_scalar().fetch_one(&mut *tx).await?;
        let rows: Vec<JobRow> = select.build_query_as().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let jobs = rows
            .into_iter()
            .map(JobStatus::try_from)
            .collect::<DbResult<Vec<_>>>()?;

        Ok(JobPage {
            jobs,
            total: total as usize,
        })
    }
}

/// Convert a page request to `OFFSET`/`LIMIT` values. A `limit` of zero
/// means no limit.
fn page_bounds(start: usize, limit: usize) -> DbResult<(i64, Option<i64>)> {
    let bound = |name: &str, value: usize| {
        i64::try_from(value)
            .map_err(|_| DbError::InvalidInput(format!("{} out of range: {}", name, value)))
    };
    let offset = bound("start", start)?;
    let limit = match limit {
        0 => None,
        n => Some(bound("limit", n)?),
    };
    Ok((offset, limit))
}

/// Select one page of matching jobs in byte order of their names.
fn select_page(
    filters: &[AnnotationFilter],
    offset: i64,
    limit: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut select =
        QueryBuilder::<Postgres>::new("SELECT name, annotations, phase, metadata FROM jobs");
    push_filters(&mut select, filters);
    select.push(r#" ORDER BY name COLLATE "C" OFFSET "#);
    select.push_bind(offset);
    if let Some(limit) = limit {
        select.push(" LIMIT ");
        select.push_bind(limit);
    }
    select
}

/// Append a `WHERE` clause matching every filter.
fn push_filters(query: &mut QueryBuilder<'_, Postgres>, filters: &[AnnotationFilter]) {
    for (i, filter) in filters.iter().enumerate() {
        query.push(if i == 0 { " WHERE " } else { " AND " });
        match &filter.rule {
            MatchRule::Equals(value) => {
                query.push("annotations ->> ");
                query.push_bind(filter.key.clone());
                query.push(" = ");
                query.push_bind(value.clone());
            }
            MatchRule::Prefix(prefix) => {
                query.push("annotations ->> ");
                query.push_bind(filter.key.clone());
                query.push(" LIKE ");
                query.push_bind(format!("{}%", escape_like(prefix)));
                query.push(" ESCAPE '\\'");
            }
            MatchRule::Exists => {
                query.push("jsonb_exists(annotations, ");
                query.push_bind(filter.key.clone());
                query.push(")");
            }
        }
    }
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn store(&self, job: JobStatus) -> kiln_core::Result<()> {
        Ok(self.upsert(&job).await?)
    }

    async fn get(&self, name: &str) -> kiln_core::Result<JobStatus> {
        Ok(self.fetch(name).await?)
    }

    async fn find(
        &self,
        filters: &[AnnotationFilter],
        start: usize,
        limit: usize,
    ) -> kiln_core::Result<JobPage> {
        Ok(self.page(filters, start, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_clause() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filters(
            &mut query,
            &[
                AnnotationFilter::equals("owner", "acme"),
                AnnotationFilter::prefix("rev", "refs/heads/"),
                AnnotationFilter::exists("repo"),
            ],
        );
        assert_eq!(
            query.sql(),
            "SELECT COUNT(*) FROM jobs WHERE annotations ->> $1 = $2 \
             AND annotations ->> $3 LIKE $4 ESCAPE '\\' \
             AND jsonb_exists(annotations, $5)"
        );
    }

    #[test]
    fn test_no_filters_no_where() {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM jobs");
        push_filters(&mut query, &[]);
        assert_eq!(query.sql(), "SELECT COUNT(*) FROM jobs");
    }

    #[test]
    fn test_page_query() {
        let query = select_page(&[AnnotationFilter::equals("owner", "acme")], 5, Some(10));
        assert_eq!(
            query.sql(),
            "SELECT name, annotations, phase, metadata FROM jobs \
             WHERE annotations ->> $1 = $2 ORDER BY name COLLATE \"C\" OFFSET $3 LIMIT $4"
        );

        let unlimited = select_page(&[], 0, None);
        assert!(unlimited.sql().ends_with(r#"ORDER BY name COLLATE "C" OFFSET $1"#));
    }

    #[test]
    fn test_page_bounds() {
        assert_eq!(page_bounds(0, 0).unwrap(), (0, None));
        assert_eq!(page_bounds(20, 10).unwrap(), (20, Some(10)));

        let err = page_bounds(usize::MAX, 10).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput(_)));
        assert!(kiln_core::Error::from(err).to_string().contains("start"));
        assert!(matches!(
            page_bounds(0, usize::MAX).unwrap_err(),
            DbError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("refs/heads/"), "refs/heads/");
        assert_eq!(escape_like("100%_done\\"), "100\\%\\_done\\\\");
    }

    #[test]
    fn test_corrupt_phase() {
        let row = JobRow {
            name: "kiln-1".to_string(),
            annotations: Json(Annotations::new()),
            phase: "exploded".to_string(),
            metadata: Json(JobMetadata::default()),
        };
        let err = JobStatus::try_from(row).unwrap_err();
        assert!(matches!(err, DbError::Corrupt { ref name, .. } if name == "kiln-1"));
    }
}
