//! Database session module.
//!
//! One PostgreSQL connection per invocation. Statements go through the simple
//! query protocol, so every column arrives in text form and is typed by the
//! PostgreSQL type name of its column. Caller-supplied statements are parsed
//! through the extended protocol first, which accepts exactly one command.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use common::models::{ColumnInfo, ConnectionParams, QueryResult, ScalarValue};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, Connection, Executor, Row, TypeInfo};

/// An open connection owned by a single invocation.
#[async_trait]
pub trait DiagnosticSession: Send {
    /// Runs one statement and returns its rows.
    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult>;

    /// Runs one caller-supplied statement. A string holding several
    /// commands is refused by the server before anything runs.
    async fn execute_single(&mut self, sql: &str) -> AppResult<QueryResult>;

    /// Closes the connection. Further `execute` calls fail.
    async fn close(&mut self);
}

/// Opens sessions from resolved connection parameters.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, params: &ConnectionParams) -> AppResult<Box<dyn DiagnosticSession>>;
}

/// Connects with sqlx.
pub struct PgConnector {
    connect_timeout: Duration,
    application_name: String,
}

impl PgConnector {
    pub fn new(connect_timeout: Duration, application_name: impl Into<String>) -> Self {
        Self {
            connect_timeout,
            application_name: application_name.into(),
        }
    }

    fn options(&self, params: &ConnectionParams) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&params.host)
            .port(params.port)
            .username(&params.username)
            .password(&params.password)
            .database(&params.dbname)
            .application_name(&self.application_name)
    }
}

#[async_trait]
impl SessionConnector for PgConnector {
    async fn connect(&self, params: &ConnectionParams) -> AppResult<Box<dyn DiagnosticSession>> {
        let options = self.options(params);
        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                AppError::DatabaseConnection(format!(
                    "connection to {}:{} timed out after {}s",
                    params.host,
                    params.port,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::DatabaseConnection(e.to_string()))?;

        tracing::info!(host = %params.host, database = %params.dbname, "Database session opened");
        Ok(Box::new(PgSession { conn: Some(conn) }))
    }
}

/// A live sqlx connection.
pub struct PgSession {
    conn: Option<PgConnection>,
}

#[async_trait]
impl DiagnosticSession for PgSession {
    async fn execute(&mut self, sql: &str) -> AppResult<QueryResult> {
        let conn = self.connection()?;

        let start = Instant::now();
        let rows = Executor::fetch_all(&mut *conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| AppError::DatabaseQuery(e.to_string()))?;

        let result = decode_rows(&rows)?;
        Ok(result.with_execution_time(start.elapsed().as_millis() as u64))
    }

    async fn execute_single(&mut self, sql: &str) -> AppResult<QueryResult> {
        let conn = self.connection()?;
        // Parse only: "cannot insert multiple commands into a prepared statement".
        Executor::prepare(&mut *conn, sql)
            .await
            .map_err(|e| AppError::DatabaseQuery(e.to_string()))?;
        self.execute(sql).await
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "Failed to close database session cleanly");
            } else {
                tracing::debug!("Database session closed");
            }
        }
    }
}

impl PgSession {
    fn connection(&mut self) -> AppResult<&mut PgConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::Internal("session already closed".into()))
    }
}

fn decode_rows(rows: &[PgRow]) -> AppResult<QueryResult> {
    let Some(first) = rows.first() else {
        return Ok(QueryResult::empty());
    };

    let columns: Vec<ColumnInfo> = first
        .columns()
        .iter()
        .map(|c| ColumnInfo::new(c.name(), c.type_info().name()))
        .collect();

    let mut decoded = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column) in columns.iter().enumerate() {
            let raw: Option<String> = row.try_get_unchecked(idx).map_err(|e| {
                AppError::DatabaseQuery(format!("failed to decode column '{}': {}", column.name, e))
            })?;
            values.push(ScalarValue::from_pg_text(&column.data_type, raw));
        }
        decoded.push(values);
    }

    Ok(QueryResult::new(columns, decoded))
}
