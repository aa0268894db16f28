//! Relational store for normalized records and checkpoints
//!
//! The orchestrator only talks to [`RecordStore`]. [`PgRecordStore`] is the
//! PostgreSQL implementation: one table per source file plus an append-only
//! `extraction_progress` table, all inside a single schema.

use async_trait::async_trait;
use b3_common::identifier::{qualified_name, quote_identifier, validate_identifier};
use chrono::NaiveDate;
use sqlx::postgres::PgConnection;
use sqlx::types::BigDecimal;
use sqlx::{Connection, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, warn};

use crate::error::{EtlError, Result};
use crate::layout::{FieldKind, LineLayout};
use crate::models::{FieldValue, NormalizedRecord};
use crate::source::FileId;

/// Rows per `INSERT` statement (26 binds per row stays well under the
/// protocol's 65535 parameter limit)
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 1000;

/// Append-only checkpoint table, one row per committed batch
pub const PROGRESS_TABLE: &str = "extraction_progress";

const INSUFFICIENT_PRIVILEGE: &str = "42501";
const UNDEFINED_TABLE: &str = "42P01";
const INVALID_SCHEMA_NAME: &str = "3F000";

/// Storage collaborator used by [`crate::pipeline::EtlSession`]
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Held for the whole file session; dropping it releases the file
    type Lease: Send + 'static;

    /// Idempotently create the schema. Fails with
    /// [`EtlError::InsufficientPrivilege`] when the role may not create it.
    async fn ensure_schema(&self) -> Result<()>;

    /// Highest committed line index, or `None` when the file (or the
    /// progress table itself) has no entry yet
    async fn read_checkpoint(&self, file: &FileId) -> Result<Option<u64>>;

    async fn write_checkpoint(&self, file: &FileId, last_line_index: u64) -> Result<()>;

    /// Append records to `table`, creating it from `layout` if needed.
    /// Returns the number of rows written.
    async fn load_batch(
        &self,
        table: &str,
        layout: &LineLayout,
        records: &[NormalizedRecord],
    ) -> Result<u64>;

    /// Take exclusive ownership of a file's checkpoint. Fails with
    /// [`EtlError::FileLocked`] if another session holds it.
    async fn lock_file(&self, file: &FileId) -> Result<Self::Lease>;

    async fn unlock_file(&self, lease: Self::Lease) -> Result<()>;
}

/// PostgreSQL-backed [`RecordStore`]
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    schema: String,
    insert_chunk_size: usize,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Result<Self> {
        let schema = schema.into();
        validate_identifier(&schema)?;
        Ok(Self {
            pool,
            schema,
            insert_chunk_size: DEFAULT_INSERT_CHUNK_SIZE,
        })
    }

    pub fn with_insert_chunk_size(mut self, rows: usize) -> Self {
        self.insert_chunk_size = rows.max(1);
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn progress_table(&self) -> String {
        qualified_name(&self.schema, PROGRESS_TABLE)
    }

    fn lock_key(&self, file: &FileId) -> String {
        format!("{}.{}", self.schema, file.as_str())
    }

    async fn create_record_table(&self, table: &str, layout: &LineLayout) -> Result<()> {
        let columns: Vec<String> = layout
            .fields()
            .iter()
            .map(|f| format!("{} {}", quote_identifier(f.name), column_type(f.kind)))
            .collect();

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified_name(&self.schema, table),
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    type Lease = PgFileLease;

    async fn ensure_schema(&self) -> Result<()> {
        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(&self.schema));
        sqlx::query(&create_schema)
            .execute(&self.pool)
            .await
            .map_err(|e| self.privilege_error(e))?;

        let create_progress = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                file_name TEXT NOT NULL,
                last_line_read BIGINT NOT NULL,
                recorded_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
            self.progress_table()
        );
        sqlx::query(&create_progress)
            .execute(&self.pool)
            .await
            .map_err(|e| self.privilege_error(e))?;

        info!(schema = %self.schema, "Schema ready");
        Ok(())
    }

    async fn read_checkpoint(&self, file: &FileId) -> Result<Option<u64>> {
        let sql = format!(
            "SELECT MAX(last_line_read) FROM {} WHERE file_name = $1",
            self.progress_table()
        );

        let stored: Option<i64> = match sqlx::query_scalar(&sql)
            .bind(file.as_str())
            .fetch_one(&self.pool)
            .await
        {
            Ok(value) => value,
            Err(e) if matches!(sqlstate(&e).as_deref(), Some(UNDEFINED_TABLE | INVALID_SCHEMA_NAME)) => {
                debug!(file = %file, "Progress table does not exist yet");
                None
            }
            Err(e) => return Err(e.into()),
        };

        // Negative values are the legacy "nothing read" marker.
        Ok(stored.and_then(|v| u64::try_from(v).ok()))
    }

    async fn write_checkpoint(&self, file: &FileId, last_line_index: u64) -> Result<()> {
        let value = i64::try_from(last_line_index).map_err(|_| {
            EtlError::InvalidConfig(format!("line index {} does not fit in BIGINT", last_line_index))
        })?;

        let sql = format!(
            "INSERT INTO {} (file_name, last_line_read) VALUES ($1, $2)",
            self.progress_table()
        );
        sqlx::query(&sql)
            .bind(file.as_str())
            .bind(value)
            .execute(&self.pool)
            .await?;

        debug!(file = %file, last_line_read = last_line_index, "Checkpoint written");
        Ok(())
    }

    async fn load_batch(
        &self,
        table: &str,
        layout: &LineLayout,
        records: &[NormalizedRecord],
    ) -> Result<u64> {
        validate_identifier(table)?;
        if records.is_empty() {
            return Ok(0);
        }

        self.create_record_table(table, layout).await?;

        let target = qualified_name(&self.schema, table);
        let columns: Vec<String> = layout.names().map(quote_identifier).collect();
        let insert = format!("INSERT INTO {} ({}) ", target, columns.join(", "));

        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for chunk in records.chunks(self.insert_chunk_size) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(&insert);

            query_builder.push_values(chunk, |mut b, record| {
                for (spec, (_, value)) in layout.fields().iter().zip(&record.values) {
                    match (value, spec.kind) {
                        (FieldValue::Text(text), _) => b.push_bind(text.clone()),
                        (FieldValue::Date(date), _) => b.push_bind(*date),
                        (FieldValue::Amount(amount), _) => b.push_bind(amount.to_decimal()),
                        (FieldValue::Integer(n), _) => b.push_bind(*n),
                        (FieldValue::Null, FieldKind::Date) => b.push_bind(None::<NaiveDate>),
                        (FieldValue::Null, FieldKind::Amount) => b.push_bind(None::<BigDecimal>),
                        (FieldValue::Null, FieldKind::Integer | FieldKind::IntegerOrZero) => {
                            b.push_bind(None::<i64>)
                        }
                        (FieldValue::Null, FieldKind::Text) => b.push_bind(None::<String>),
                    };
                }
            });

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;

        debug!(table = %target, rows = written, "Batch loaded");
        Ok(written)
    }

    async fn lock_file(&self, file: &FileId) -> Result<PgFileLease> {
        // Session-level advisory locks belong to a connection, so the lease
        // keeps one out of the pool for its whole lifetime.
        let mut conn = self.pool.acquire().await?.detach();
        let key = self.lock_key(file);

        let granted: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock(hashtextextended($1, 0))")
            .bind(&key)
            .fetch_one(&mut conn)
            .await?;

        if !granted {
            if let Err(e) = conn.close().await {
                warn!(file = %file, error = %e, "Failed to close lock connection");
            }
            return Err(EtlError::FileLocked(file.to_string()));
        }

        debug!(file = %file, "Acquired file lock");
        Ok(PgFileLease {
            conn: Some(conn),
            key,
        })
    }

    async fn unlock_file(&self, lease: PgFileLease) -> Result<()> {
        lease.release().await
    }
}

impl PgRecordStore {
    fn privilege_error(&self, err: sqlx::Error) -> EtlError {
        if sqlstate(&err).as_deref() == Some(INSUFFICIENT_PRIVILEGE) {
            EtlError::InsufficientPrivilege(format!(
                "the database role may not create schema {} or its tables; \
                 grant CREATE on the database or create the schema beforehand",
                self.schema
            ))
        } else {
            err.into()
        }
    }
}

/// Advisory lock on one file. Dropping the lease closes its connection,
/// which releases the lock server-side.
pub struct PgFileLease {
    conn: Option<PgConnection>,
    key: String,
}

impl PgFileLease {
    pub async fn release(mut self) -> Result<()> {
        if let Some(mut conn) = self.conn.take() {
            sqlx::query("SELECT pg_advisory_unlock(hashtextextended($1, 0))")
                .bind(&self.key)
                .execute(&mut conn)
                .await?;
            conn.close().await?;
        }
        Ok(())
    }
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "TEXT",
        FieldKind::Date => "DATE",
        FieldKind::Amount => "NUMERIC(18, 2)",
        FieldKind::Integer | FieldKind::IntegerOrZero => "BIGINT",
    }
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}
