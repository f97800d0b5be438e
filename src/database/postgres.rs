//! Postgres backend: filters compile to parameterized SQL and rows come back
//! through `row_to_json`, so callers never deal with column types.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use sqlx::{postgres::PgArguments, PgPool, Postgres, Row as _};
use tracing::debug;

use super::manager::{Database, DatabaseError, Row, Transaction};
use crate::filter::error::{is_identifier, validate_column};
use crate::filter::Filter;

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PgTransaction {
    /// Runs a statement whose single output column `row` is a JSON object.
    async fn fetch_rows(&mut self, query: &str, params: &[Value]) -> Result<Vec<Row>, DatabaseError> {
        log_query(query);
        let mut q = sqlx::query(query);
        for p in params {
            q = bind_param(q, p);
        }
        let rows = q.fetch_all(&mut *self.tx).await.map_err(map_sqlx_error)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<Value, _>("row")? {
                Value::Object(map) => out.push(map),
                other => return Err(DatabaseError::QueryError(format!("unexpected row shape: {}", other))),
            }
        }
        Ok(out)
    }

    async fn execute(&mut self, query: &str, params: &[Value]) -> Result<u64, DatabaseError> {
        log_query(query);
        let mut q = sqlx::query(query);
        for p in params {
            q = bind_param(q, p);
        }
        let result = q.execute(&mut *self.tx).await.map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn select(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError> {
        let sql = with_valid_ids(filter)?.to_sql()?;
        let wrapped = format!("SELECT row_to_json(t) AS row FROM ({}) t", sql.query);
        self.fetch_rows(&wrapped, &sql.params).await
    }

    async fn count(&mut self, filter: &Filter) -> Result<i64, DatabaseError> {
        let sql = with_valid_ids(filter)?.to_count_sql()?;
        log_query(&sql.query);
        let mut q = sqlx::query(&sql.query);
        for p in sql.params.iter() {
            q = bind_param(q, p);
        }
        let row = q.fetch_one(&mut *self.tx).await.map_err(map_sqlx_error)?;
        let count: i64 = row.try_get("count")?;
        Ok(count)
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, DatabaseError> {
        // Validates the table name
        Filter::new(table)?;

        let mut columns = vec![];
        let mut values = vec![];
        let mut params = vec![];
        for (column, value) in row {
            validate_column(column)?;
            columns.push(format!("\"{}\"", column));
            if value.is_null() {
                values.push("NULL".to_string());
            } else {
                params.push(value.clone());
                values.push(format!("${}", params.len()));
            }
        }

        let query = format!(
            "WITH ins AS (INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *) SELECT row_to_json(ins) AS row FROM ins",
            table,
            columns.join(", "),
            values.join(", ")
        );
        self.fetch_rows(&query, &params)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::QueryError(format!("insert into {} returned no row", table)))
    }

    async fn update(&mut self, filter: &Filter, changes: &Row) -> Result<u64, DatabaseError> {
        let sql = with_valid_ids(filter)?.to_update_sql(changes)?;
        self.execute(&sql.query, &sql.params).await
    }

    async fn delete(&mut self, filter: &Filter) -> Result<u64, DatabaseError> {
        let sql = with_valid_ids(filter)?.to_delete_sql()?;
        self.execute(&sql.query, &sql.params).await
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let name = savepoint_name(name)?;
        self.execute(&format!("SAVEPOINT {}", name), &[]).await.map(|_| ())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let name = savepoint_name(name)?;
        self.execute(&format!("ROLLBACK TO SAVEPOINT {}", name), &[]).await.map(|_| ())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let name = savepoint_name(name)?;
        self.execute(&format!("RELEASE SAVEPOINT {}", name), &[]).await.map(|_| ())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// `id` columns are uuid. A malformed id can never match, so it is rewritten out
/// of the filter instead of failing the cast: equality becomes an empty `$in`,
/// list operators drop it and `$ne` on it is dropped.
fn with_valid_ids(filter: &Filter) -> Result<Filter, DatabaseError> {
    let mut filter = filter.clone();
    if let Some(mut conditions) = filter.where_data().cloned() {
        drop_malformed_ids(&mut conditions);
        filter.where_clause(conditions)?;
    }
    Ok(filter)
}

fn drop_malformed_ids(conditions: &mut Value) {
    let Some(obj) = conditions.as_object_mut() else {
        return;
    };
    for (key, value) in obj.iter_mut() {
        match key.as_str() {
            "$and" | "$or" => {
                if let Some(items) = value.as_array_mut() {
                    items.iter_mut().for_each(drop_malformed_ids);
                }
            }
            "$not" => drop_malformed_ids(value),
            "id" => *value = valid_id_condition(value),
            _ => {}
        }
    }
    if obj.get("id").map_or(false, |v| v.as_object().map_or(false, |ops| ops.is_empty())) {
        obj.remove("id");
    }
}

fn valid_id_condition(condition: &Value) -> Value {
    let never = || json!({ "$in": [] });
    let ops = match condition {
        Value::String(id) if is_uuid(id) => return condition.clone(),
        Value::String(_) => return never(),
        Value::Object(ops) => ops,
        other => return other.clone(),
    };

    let mut kept = serde_json::Map::new();
    for (op, data) in ops {
        match (op.as_str(), data) {
            ("$eq", Value::String(id)) if !is_uuid(id) => return never(),
            ("$ne", Value::String(id)) if !is_uuid(id) => {}
            ("$in" | "$nin", Value::Array(ids)) => {
                let ids: Vec<Value> = ids
                    .iter()
                    .filter(|v| v.as_str().map_or(true, is_uuid))
                    .cloned()
                    .collect();
                kept.insert(op.clone(), Value::Array(ids));
            }
            _ => {
                kept.insert(op.clone(), data.clone());
            }
        }
    }
    Value::Object(kept)
}

fn is_uuid(id: &str) -> bool {
    uuid::Uuid::parse_str(id).is_ok()
}

fn savepoint_name(name: &str) -> Result<&str, DatabaseError> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(DatabaseError::QueryError(format!("invalid savepoint name: {}", name)))
    }
}

fn log_query(query: &str) {
    if crate::config::config().database.enable_query_logging {
        debug!(target: "sql", "{}", query);
    }
}

fn map_sqlx_error(err: sqlx::Error) -> DatabaseError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return DatabaseError::UniqueViolation(db_err.message().to_string());
        }
    }
    DatabaseError::Sqlx(err)
}

/// Strings are bound with the narrowest type they parse as, so comparisons against
/// uuid, timestamptz and date columns type-check without casts.
fn bind_param<'q>(
    q: sqlx::query::Query<'q, Postgres, PgArguments>,
    v: &'q Value,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                // Postgres doesn't have u64; cast down if safe
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => {
            if let Ok(id) = uuid::Uuid::parse_str(s) {
                q.bind(id)
            } else if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                q.bind(ts.with_timezone(&Utc))
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                q.bind(date)
            } else {
                q.bind(s.as_str())
            }
        }
        // JSONB
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
