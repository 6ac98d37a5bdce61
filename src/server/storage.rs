//! PostgreSQL access.
//!
//! Handlers never talk to the pool directly; they hand compiled queries to a
//! `QueryExecutor`, which returns each row as a JSON object.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::query_builder::{CompiledQuery, SqlValue};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("unexpected row shape: {0}")]
    Decode(String),
}

/// Statements run inside one transaction, followed by the query whose rows
/// are returned. Temporary tables created with `ON COMMIT DROP` vanish when
/// the transaction ends either way.
#[derive(Debug, Clone, PartialEq)]
pub struct TempTableJob {
    pub statements: Vec<CompiledQuery>,
    pub query: CompiledQuery,
}

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn fetch_all(&self, query: &CompiledQuery) -> Result<Vec<Value>, StorageError>;

    async fn fetch_optional(&self, query: &CompiledQuery) -> Result<Option<Value>, StorageError> {
        Ok(self.fetch_all(query).await?.into_iter().next())
    }

    async fn run_in_transaction(&self, job: &TempTableJob) -> Result<Vec<Value>, StorageError>;
}

pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        PgExecutor { pool }
    }

    pub async fn connect(config: &ServerConfig) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database_url)
            .await?;
        log::info!(
            "connected to database (max {} connections)",
            config.db_max_connections
        );
        Ok(PgExecutor { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlValue::Int(n) => query.bind(*n),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Text(s) | SqlValue::Untyped(s) => query.bind(s.clone()),
            SqlValue::IntArray(items) => query.bind(items.clone()),
            SqlValue::TextArray(items) => query.bind(items.clone()),
        };
    }
    query
}

/// Wrap a query so each row comes back as one JSON column.
fn as_json_rows(sql: &str) -> String {
    format!("select row_to_json(q) as row from ({}) as q", sql)
}

fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Value>, StorageError> {
    rows.into_iter()
        .map(|row| {
            row.try_get::<Value, _>(0)
                .map_err(|e| StorageError::Decode(e.to_string()))
        })
        .collect()
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch_all(&self, query: &CompiledQuery) -> Result<Vec<Value>, StorageError> {
        let sql = as_json_rows(&query.sql);
        log::debug!("executing: {}", query.sql);
        let rows = bind_params(sqlx::query(&sql), &query.params)
            .fetch_all(&self.pool)
            .await?;
        decode_rows(rows)
    }

    async fn run_in_transaction(&self, job: &TempTableJob) -> Result<Vec<Value>, StorageError> {
        let mut tx = self.pool.begin().await?;

        for statement in &job.statements {
            log::debug!("executing: {}", statement.sql);
            bind_params(sqlx::query(&statement.sql), &statement.params)
                .execute(&mut *tx)
                .await?;
        }

        let sql = as_json_rows(&job.query.sql);
        let rows = bind_params(sqlx::query(&sql), &job.query.params)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        decode_rows(rows)
    }
}
