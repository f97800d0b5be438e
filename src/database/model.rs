use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::manager::{DatabaseError, Row};
use super::queryset::{Manager, QuerySet};
use crate::filter::Scope;

/// Columns every soft-deletable model carries.
pub const SYSTEM_COLUMNS: [&str; 4] = ["id", "created_at", "updated_at", "deleted_at"];

/// Restricts a queryset to the rows a principal owns.
#[derive(Clone)]
pub enum Ownership {
    /// Rows whose column equals the principal id.
    Field(String),
    /// Builds a filter tree from the principal id.
    Custom(Arc<dyn Fn(&str) -> Value + Send + Sync>),
}

impl fmt::Debug for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ownership::Field(column) => f.debug_tuple("Field").field(column).finish(),
            Ownership::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A to-one foreign key: `column` on this model holds the id of a `target` row.
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub column: String,
    pub target: Arc<ModelDef>,
}

#[derive(Debug, Clone)]
pub struct ModelDef {
    pub table: String,
    pub columns: Vec<String>,
    pub permission_key: Option<String>,
    pub ownership: Option<Ownership>,
    pub links: Vec<Link>,
}

impl ModelDef {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: vec![],
            permission_key: None,
            ownership: None,
            links: vec![],
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Key looked up in the principal's role permissions.
    pub fn permission_key(mut self, key: impl Into<String>) -> Self {
        self.permission_key = Some(key.into());
        self
    }

    pub fn owned_by(mut self, column: impl Into<String>) -> Self {
        self.ownership = Some(Ownership::Field(column.into()));
        self
    }

    pub fn owned_with<F>(mut self, filter: F) -> Self
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        self.ownership = Some(Ownership::Custom(Arc::new(filter)));
        self
    }

    /// Declares `column` as a foreign key to `target`, reachable as `name` in export accessors.
    pub fn link(mut self, name: impl Into<String>, column: impl Into<String>, target: Arc<ModelDef>) -> Self {
        let column = column.into();
        if !self.columns.contains(&column) {
            self.columns.push(column.clone());
        }
        self.links.push(Link { name: name.into(), column, target });
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Declared columns followed by the system columns.
    pub fn field_names(&self) -> Vec<String> {
        let mut names: Vec<String> = vec!["id".to_string()];
        names.extend(self.columns.iter().filter(|c| c.as_str() != "id").cloned());
        names.extend(SYSTEM_COLUMNS[1..].iter().map(|c| c.to_string()));
        names
    }

    pub fn has_column(&self, column: &str) -> bool {
        SYSTEM_COLUMNS.contains(&column) || self.columns.iter().any(|c| c == column)
    }

    pub fn find_link(&self, name: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.name == name)
    }

    pub fn check_columns(&self, row: &Row) -> Result<(), DatabaseError> {
        match row.keys().find(|k| !self.has_column(k)) {
            Some(column) => Err(DatabaseError::UnknownColumn {
                table: self.table.clone(),
                column: column.clone(),
            }),
            None => Ok(()),
        }
    }

    /// The filter that keeps only rows owned by `principal_id`, if the model defines ownership.
    pub fn owner_filter(&self, principal_id: &str) -> Option<Value> {
        self.ownership.as_ref().map(|ownership| match ownership {
            Ownership::Field(column) => {
                let mut map = serde_json::Map::new();
                map.insert(column.clone(), Value::String(principal_id.to_string()));
                Value::Object(map)
            }
            Ownership::Custom(build) => build(principal_id),
        })
    }

    /// Alive rows only.
    pub fn objects(self: &Arc<Self>) -> Manager {
        Manager::new(self.clone(), Scope::Alive)
    }

    /// Every row regardless of `deleted_at`.
    pub fn all_objects(self: &Arc<Self>) -> Manager {
        Manager::new(self.clone(), Scope::All)
    }

    pub fn scoped(self: &Arc<Self>, scope: Scope) -> QuerySet {
        QuerySet::new(self.clone(), scope)
    }
}

pub fn row_id(row: &Row) -> Option<&str> {
    row.get("id").and_then(Value::as_str)
}
