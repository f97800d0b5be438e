use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::filter::{Filter, FilterError};

/// A row as seen by every layer above the backend: column name to JSON value.
pub type Row = Map<String, Value>;

/// Errors from the persistence layer
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Multiple objects returned: {0}")]
    MultipleObjectsReturned(String),

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Unknown column '{column}' on {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// A store that hands out transactions. Every request runs inside exactly one.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}

/// Row operations inside an open transaction. Nothing is visible to other
/// transactions until `commit`; dropping without commit rolls back.
#[async_trait]
pub trait Transaction: Send {
    async fn select(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError>;

    async fn count(&mut self, filter: &Filter) -> Result<i64, DatabaseError>;

    /// Insert one row and return it as stored.
    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, DatabaseError>;

    /// Apply `changes` to every row matched by `filter`, returning the affected count.
    async fn update(&mut self, filter: &Filter, changes: &Row) -> Result<u64, DatabaseError>;

    /// Physically remove every matched row.
    async fn delete(&mut self, filter: &Filter) -> Result<u64, DatabaseError>;

    async fn savepoint(&mut self, name: &str) -> Result<(), DatabaseError>;

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError>;

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Builds Postgres pools from configuration
pub struct DatabaseManager;

impl DatabaseManager {
    /// Connect using `DATABASE_URL` from the loaded configuration
    pub async fn from_config() -> Result<PgPool, DatabaseError> {
        let url = crate::config::config()
            .database
            .url
            .clone()
            .ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;
        Self::connect(&url).await
    }

    pub async fn connect(database_url: &str) -> Result<PgPool, DatabaseError> {
        let parsed = Self::validate_url(database_url)?;
        let settings = &crate::config::config().database;

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect(database_url)
            .await?;

        info!("Created database pool for: {}", Self::redacted(&parsed));
        Ok(pool)
    }

    fn validate_url(database_url: &str) -> Result<url::Url, DatabaseError> {
        let url = url::Url::parse(database_url).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        match url.scheme() {
            "postgres" | "postgresql" => Ok(url),
            _ => Err(DatabaseError::InvalidDatabaseUrl),
        }
    }

    /// Connection string safe for logs
    fn redacted(url: &url::Url) -> String {
        let mut url = url.clone();
        if url.password().is_some() {
            let _ = url.set_password(Some("***"));
        }
        url.to_string()
    }
}
