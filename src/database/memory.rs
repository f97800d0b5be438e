//! In-process backend. A transaction holds the store's write lock for its whole
//! lifetime and works on a private copy, so transactions are fully serialized and
//! a dropped transaction leaves no trace.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::manager::{Database, DatabaseError, Row, Transaction};
use crate::filter::filter_match::{matches, sort_rows};
use crate::filter::Filter;

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: HashMap<String, Vec<Row>>,
}

#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<RwLock<Tables>>,
    unique: Arc<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a unique constraint over `columns`; rows with a NULL in any of them never conflict.
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        Arc::make_mut(&mut self.unique)
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    /// Committed rows of `table`, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().await.rows.get(table).cloned().unwrap_or_default()
    }

    /// Append rows as-is, bypassing constraints (for seeding legacy data).
    pub async fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables.write().await.rows.entry(table.to_string()).or_default().extend(rows);
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DatabaseError> {
        let guard = self.tables.clone().write_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            savepoints: vec![],
            unique: self.unique.clone(),
        }))
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}

pub struct MemoryTransaction {
    guard: OwnedRwLockWriteGuard<Tables>,
    working: Tables,
    savepoints: Vec<(String, Tables)>,
    unique: Arc<HashMap<String, Vec<Vec<String>>>>,
}

impl MemoryTransaction {
    fn matching(&self, filter: &Filter) -> Result<Vec<Row>, DatabaseError> {
        let mut out = vec![];
        if let Some(rows) = self.working.rows.get(filter.table_name()) {
            for row in rows {
                if matches(filter.where_data(), filter.scope_value(), row)? {
                    out.push(row.clone());
                }
            }
        }
        Ok(out)
    }

    fn check_unique(&self, table: &str, candidate: &Row, skip: Option<usize>) -> Result<(), DatabaseError> {
        let constraints = match self.unique.get(table) {
            Some(constraints) => constraints,
            None => return Ok(()),
        };
        let rows = match self.working.rows.get(table) {
            Some(rows) => rows,
            None => return Ok(()),
        };

        for columns in constraints {
            let key: Vec<&Value> = columns.iter().map(|c| candidate.get(c).unwrap_or(&Value::Null)).collect();
            if key.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = rows.iter().enumerate().any(|(i, row)| {
                Some(i) != skip
                    && columns
                        .iter()
                        .zip(key.iter())
                        .all(|(c, v)| row.get(c).unwrap_or(&Value::Null) == *v)
            });
            if clash {
                return Err(DatabaseError::UniqueViolation(format!(
                    "duplicate key value violates unique constraint on {}({})",
                    table,
                    columns.join(", ")
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn select(&mut self, filter: &Filter) -> Result<Vec<Row>, DatabaseError> {
        let mut rows = self.matching(filter)?;
        sort_rows(&mut rows, filter.order_data());

        let offset = filter.offset_value().unwrap_or(0);
        let rows = rows.into_iter().skip(offset);
        Ok(match filter.limit_value() {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&mut self, filter: &Filter) -> Result<i64, DatabaseError> {
        Ok(self.matching(filter)?.len() as i64)
    }

    async fn insert(&mut self, table: &str, row: &Row) -> Result<Row, DatabaseError> {
        Filter::new(table)?;
        self.check_unique(table, row, None)?;
        self.working.rows.entry(table.to_string()).or_default().push(row.clone());
        Ok(row.clone())
    }

    async fn update(&mut self, filter: &Filter, changes: &Row) -> Result<u64, DatabaseError> {
        let table = filter.table_name().to_string();
        let len = self.working.rows.get(&table).map(|r| r.len()).unwrap_or(0);

        let mut affected = 0;
        for i in 0..len {
            let current = self.working.rows[&table][i].clone();
            if !matches(filter.where_data(), filter.scope_value(), &current)? {
                continue;
            }
            let mut updated = current;
            for (column, value) in changes {
                updated.insert(column.clone(), value.clone());
            }
            self.check_unique(&table, &updated, Some(i))?;
            if let Some(rows) = self.working.rows.get_mut(&table) {
                rows[i] = updated;
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete(&mut self, filter: &Filter) -> Result<u64, DatabaseError> {
        let rows = match self.working.rows.get_mut(filter.table_name()) {
            Some(rows) => rows,
            None => return Ok(0),
        };

        let before = rows.len();
        let mut kept = Vec::with_capacity(before);
        for row in rows.drain(..) {
            if !matches(filter.where_data(), filter.scope_value(), &row)? {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok((before - rows.len()) as u64)
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        self.savepoints.push((name.to_string(), self.working.clone()));
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DatabaseError::QueryError(format!("savepoint {} does not exist", name)))?;
        // The savepoint itself survives a rollback to it
        self.savepoints.truncate(position + 1);
        self.working = self.savepoints[position].1.clone();
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), DatabaseError> {
        let position = self
            .savepoints
            .iter()
            .rposition(|(n, _)| n == name)
            .ok_or_else(|| DatabaseError::QueryError(format!("savepoint {} does not exist", name)))?;
        self.savepoints.truncate(position);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let MemoryTransaction { mut guard, working, .. } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}
