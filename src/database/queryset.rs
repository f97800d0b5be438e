//! Soft-deletion query layer. A `QuerySet` is a lazy, cloneable description of a
//! row set; nothing touches the store until one of the async terminal methods runs
//! inside a transaction.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use super::manager::{DatabaseError, Row, Transaction};
use super::model::ModelDef;
use crate::filter::{Filter, FilterOrderInfo, Scope};

pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, Clone)]
pub struct QuerySet {
    model: Arc<ModelDef>,
    scope: Scope,
    conditions: Vec<Value>,
    order: Vec<FilterOrderInfo>,
    limit: Option<usize>,
    offset: Option<usize>,
    for_update: bool,
}

impl QuerySet {
    pub fn new(model: Arc<ModelDef>, scope: Scope) -> Self {
        Self {
            model,
            scope,
            conditions: vec![],
            order: vec![],
            limit: None,
            offset: None,
            for_update: false,
        }
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn filter(mut self, conditions: Value) -> Self {
        if !conditions.is_null() {
            self.conditions.push(conditions);
        }
        self
    }

    pub fn exclude(mut self, conditions: Value) -> Self {
        self.conditions.push(json!({ "$not": conditions }));
        self
    }

    pub fn alive(self) -> Self {
        self.filter(json!({ "deleted_at": null }))
    }

    pub fn dead(self) -> Self {
        self.filter(json!({ "deleted_at": { "$ne": null } }))
    }

    /// Django-style field list: `"-created_at"` sorts descending.
    pub fn order_by<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.order = fields.into_iter().map(|f| FilterOrderInfo::from_field(f.as_ref())).collect();
        self
    }

    pub fn order_by_info(mut self, order: Vec<FilterOrderInfo>) -> Self {
        self.order = order;
        self
    }

    pub fn ordering(&self) -> &[FilterOrderInfo] {
        &self.order
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn select_for_update(mut self) -> Self {
        self.for_update = true;
        self
    }

    pub fn to_filter(&self) -> Result<Filter, DatabaseError> {
        let mut filter = Filter::new(&self.model.table)?;
        let where_data = match self.conditions.len() {
            0 => Value::Null,
            1 => self.conditions[0].clone(),
            _ => json!({ "$and": self.conditions }),
        };
        filter.where_clause(where_data)?;
        filter.order_by(self.order.clone())?;
        filter.limit(self.limit, self.offset).scope(self.scope);
        if self.for_update {
            filter.for_update();
        }
        Ok(filter)
    }

    pub async fn all(&self, tx: &mut dyn Transaction) -> Result<Vec<Row>, DatabaseError> {
        tx.select(&self.to_filter()?).await
    }

    /// First row by the current ordering, or by `id` when unordered.
    pub async fn first(&self, tx: &mut dyn Transaction) -> Result<Option<Row>, DatabaseError> {
        let mut qs = self.clone().limit(1);
        if qs.order.is_empty() {
            qs.order = vec![FilterOrderInfo::asc("id")];
        }
        Ok(qs.all(tx).await?.into_iter().next())
    }

    /// Exactly one row, or `NotFound` / `MultipleObjectsReturned`.
    pub async fn get(&self, tx: &mut dyn Transaction) -> Result<Row, DatabaseError> {
        let mut rows = self.clone().limit(2).all(tx).await?;
        match rows.len() {
            0 => Err(DatabaseError::NotFound(format!(
                "{} matching query does not exist",
                self.model.table
            ))),
            1 => Ok(rows.remove(0)),
            _ => Err(DatabaseError::MultipleObjectsReturned(format!(
                "get() on {} returned more than one row",
                self.model.table
            ))),
        }
    }

    pub async fn count(&self, tx: &mut dyn Transaction) -> Result<i64, DatabaseError> {
        tx.count(&self.to_filter()?).await
    }

    pub async fn exists(&self, tx: &mut dyn Transaction) -> Result<bool, DatabaseError> {
        Ok(self.first(tx).await?.is_some())
    }

    /// Bulk update; `updated_at` is stamped unless the caller sets it.
    pub async fn update(&self, tx: &mut dyn Transaction, mut changes: Row) -> Result<u64, DatabaseError> {
        self.model.check_columns(&changes)?;
        changes.remove("id");
        if changes.is_empty() {
            return Ok(0);
        }
        changes
            .entry("updated_at")
            .or_insert_with(|| Value::String(timestamp_now()));
        tx.update(&self.to_filter()?, &changes).await
    }

    /// Soft delete: stamps `deleted_at` on every matched row, removing nothing.
    pub async fn delete(&self, tx: &mut dyn Transaction) -> Result<u64, DatabaseError> {
        let now = Value::String(timestamp_now());
        let mut changes = Row::new();
        changes.insert("deleted_at".to_string(), now.clone());
        changes.insert("updated_at".to_string(), now);
        tx.update(&self.to_filter()?, &changes).await
    }

    /// Physical removal.
    pub async fn hard_delete(&self, tx: &mut dyn Transaction) -> Result<u64, DatabaseError> {
        tx.delete(&self.to_filter()?).await
    }
}

/// Entry point for a model's rows: `objects()` sees alive rows, `all_objects()` everything.
#[derive(Debug, Clone)]
pub struct Manager {
    model: Arc<ModelDef>,
    scope: Scope,
}

impl Manager {
    pub fn new(model: Arc<ModelDef>, scope: Scope) -> Self {
        Self { model, scope }
    }

    pub fn query(&self) -> QuerySet {
        QuerySet::new(self.model.clone(), self.scope)
    }

    pub fn filter(&self, conditions: Value) -> QuerySet {
        self.query().filter(conditions)
    }

    pub fn exclude(&self, conditions: Value) -> QuerySet {
        self.query().exclude(conditions)
    }

    pub async fn get(&self, tx: &mut dyn Transaction, conditions: Value) -> Result<Row, DatabaseError> {
        self.filter(conditions).get(tx).await
    }

    pub async fn get_by_id(&self, tx: &mut dyn Transaction, id: &str) -> Result<Row, DatabaseError> {
        self.get(tx, json!({ "id": id })).await
    }

    pub async fn hard_delete(&self, tx: &mut dyn Transaction) -> Result<u64, DatabaseError> {
        self.query().hard_delete(tx).await
    }

    /// Insert a row, filling `id` and the timestamps.
    pub async fn create(&self, tx: &mut dyn Transaction, mut data: Row) -> Result<Row, DatabaseError> {
        self.model.check_columns(&data)?;

        if data.get("id").map_or(true, Value::is_null) {
            data.insert("id".to_string(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        let now = Value::String(timestamp_now());
        data.entry("created_at").or_insert_with(|| now.clone());
        data.insert("updated_at".to_string(), now);
        data.entry("deleted_at").or_insert(Value::Null);

        tx.insert(&self.model.table, &data).await
    }

    /// Look up by `lookup`, creating from `lookup` + `defaults` when absent.
    ///
    /// A concurrent insert that wins the unique key falls back to a second lookup.
    /// Duplicate matches (legacy data) resolve to the first row by id with a warning
    /// instead of failing.
    pub async fn get_or_create(
        &self,
        tx: &mut dyn Transaction,
        lookup: Value,
        defaults: Row,
    ) -> Result<(Row, bool), DatabaseError> {
        let existing = self.filter(lookup.clone());
        match existing.get(tx).await {
            Ok(row) => return Ok((row, false)),
            Err(DatabaseError::NotFound(_)) => {}
            Err(DatabaseError::MultipleObjectsReturned(msg)) => {
                return self.first_of_duplicates(tx, &existing, &lookup, &msg).await;
            }
            Err(e) => return Err(e),
        }

        let mut data = defaults;
        if let Value::Object(fields) = &lookup {
            for (key, value) in fields {
                if !key.starts_with('$') && !value.is_object() {
                    data.insert(key.clone(), value.clone());
                }
            }
        }

        let savepoint = format!("get_or_create_{}", uuid::Uuid::new_v4().simple());
        tx.savepoint(&savepoint).await?;
        match self.create(tx, data).await {
            Ok(row) => {
                tx.release_savepoint(&savepoint).await?;
                Ok((row, true))
            }
            Err(DatabaseError::UniqueViolation(reason)) => {
                tx.rollback_to_savepoint(&savepoint).await?;
                tx.release_savepoint(&savepoint).await?;
                warn!(
                    "{} get_or_create hit a unique conflict ({}), retrying lookup {}",
                    self.model.table, reason, lookup
                );
                match existing.get(tx).await {
                    Ok(row) => Ok((row, false)),
                    Err(DatabaseError::MultipleObjectsReturned(msg)) => {
                        self.first_of_duplicates(tx, &existing, &lookup, &msg).await
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => {
                tx.rollback_to_savepoint(&savepoint).await?;
                tx.release_savepoint(&savepoint).await?;
                Err(e)
            }
        }
    }

    async fn first_of_duplicates(
        &self,
        tx: &mut dyn Transaction,
        existing: &QuerySet,
        lookup: &Value,
        reason: &str,
    ) -> Result<(Row, bool), DatabaseError> {
        let first = existing
            .first(tx)
            .await?
            .ok_or_else(|| DatabaseError::NotFound(format!("{} matching query does not exist", self.model.table)))?;
        warn!(
            "{} get_or_create returned multiple objects matching: {}, with error: {}, will fallback to first match: {}",
            self.model.table,
            lookup,
            reason,
            first.get("id").cloned().unwrap_or(serde_json::Value::Null)
        );
        Ok((first, false))
    }

    /// Save `changes` onto one row (any scope) and return the stored row.
    pub async fn update_instance(
        &self,
        tx: &mut dyn Transaction,
        id: &str,
        changes: Row,
    ) -> Result<Row, DatabaseError> {
        let target = QuerySet::new(self.model.clone(), Scope::All).filter(json!({ "id": id }));
        target.update(tx, changes).await?;
        target.get(tx).await
    }

    /// Soft-delete a single row.
    pub async fn delete_instance(&self, tx: &mut dyn Transaction, id: &str) -> Result<u64, DatabaseError> {
        QuerySet::new(self.model.clone(), Scope::All)
            .filter(json!({ "id": id }))
            .delete(tx)
            .await
    }

    pub async fn hard_delete_instance(&self, tx: &mut dyn Transaction, id: &str) -> Result<u64, DatabaseError> {
        QuerySet::new(self.model.clone(), Scope::All)
            .filter(json!({ "id": id }))
            .hard_delete(tx)
            .await
    }
}
