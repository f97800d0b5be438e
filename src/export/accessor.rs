use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::ExportError;
use crate::database::{DatabaseError, Link, ModelDef, QuerySet, Row, Transaction};
use crate::filter::filter_match::compare_values;
use crate::filter::{FilterOrderInfo, Scope, SortDirection};

/// A dotted path such as `owner.team.name`, resolved against the model once:
/// every segment but the last must be a declared link, the last a column.
#[derive(Debug, Clone)]
pub struct Accessor {
    path: String,
    links: Vec<Link>,
    column: String,
}

impl Accessor {
    pub fn compile(model: &Arc<ModelDef>, path: &str) -> Result<Self, ExportError> {
        let segments: Vec<&str> = path.split('.').map(str::trim).collect();
        let unknown = || ExportError::UnknownAccessor {
            accessor: path.to_string(),
            model: model.table.clone(),
        };
        if segments.iter().any(|s| s.is_empty()) {
            return Err(unknown());
        }

        let (last, hops) = segments.split_last().ok_or_else(unknown)?;
        let links = follow(model, hops).ok_or_else(unknown)?;
        let target = links.last().map(|l| &l.target).unwrap_or(model);

        // A trailing link name reads the raw foreign key.
        let column = if target.has_column(last) {
            last.to_string()
        } else if let Some(link) = target.find_link(last) {
            link.column.clone()
        } else {
            return Err(unknown());
        };

        Ok(Self {
            path: path.to_string(),
            links,
            column,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn resolve(&self, row: &Row, related: &RelatedRows) -> Value {
        let mut current = row;
        for link in &self.links {
            let next = current
                .get(&link.column)
                .and_then(Value::as_str)
                .and_then(|id| related.get(&link.target.table, id));
            match next {
                Some(next) => current = next,
                None => return Value::Null,
            }
        }
        current.get(&self.column).cloned().unwrap_or(Value::Null)
    }
}

/// Link path of a `select_related`/`prefetch_related` hint (`owner__team` or `owner.team`).
pub fn compile_hint(model: &Arc<ModelDef>, hint: &str) -> Result<Vec<Link>, ExportError> {
    let normalized = hint.replace("__", ".");
    let segments: Vec<&str> = normalized.split('.').map(str::trim).collect();
    let links = if segments.iter().any(|s| s.is_empty()) {
        None
    } else {
        follow(model, &segments)
    };
    links.ok_or_else(|| ExportError::UnknownAccessor {
        accessor: hint.to_string(),
        model: model.table.clone(),
    })
}

fn follow(model: &Arc<ModelDef>, names: &[&str]) -> Option<Vec<Link>> {
    let mut links = Vec::with_capacity(names.len());
    let mut current = model.clone();
    for name in names {
        let link = current.find_link(name)?.clone();
        current = link.target.clone();
        links.push(link);
    }
    Some(links)
}

/// An `order_by` key that crosses links, such as `-settings__visibility`.
/// Rows are sorted in memory once the linked rows are loaded; rows whose link
/// is unset sort like NULL.
#[derive(Debug, Clone)]
pub struct LinkedOrder {
    accessor: Accessor,
    sort: SortDirection,
}

impl LinkedOrder {
    /// `None` unless the key names at least one declared link followed by a column.
    pub fn parse(model: &Arc<ModelDef>, field: &str) -> Option<Self> {
        let info = FilterOrderInfo::from_field(field);
        if !info.column.contains("__") {
            return None;
        }
        let accessor = Accessor::compile(model, &info.column.replace("__", ".")).ok()?;
        if accessor.links().is_empty() {
            return None;
        }
        Some(Self { accessor, sort: info.sort })
    }

    pub fn path(&self) -> &str {
        self.accessor.path()
    }

    /// Every row of `queryset` in linked order; ties keep id order in the same direction.
    pub async fn load(&self, tx: &mut dyn Transaction, queryset: QuerySet) -> Result<Vec<Row>, DatabaseError> {
        let by_id = FilterOrderInfo {
            column: "id".to_string(),
            sort: self.sort,
        };
        let rows = queryset.order_by_info(vec![by_id]).all(tx).await?;

        let mut related = RelatedRows::new();
        related.prefetch(tx, &rows, self.accessor.links()).await?;

        let mut keyed: Vec<(Value, Row)> = rows
            .into_iter()
            .map(|row| (self.accessor.resolve(&row, &related), row))
            .collect();
        keyed.sort_by(|(a, _), (b, _)| match self.sort {
            SortDirection::Asc => compare_values(a, b),
            SortDirection::Desc => compare_values(a, b).reverse(),
        });
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

/// Rows reached through links, loaded in batches and keyed by table and id.
#[derive(Debug, Default)]
pub struct RelatedRows {
    tables: HashMap<String, HashMap<String, Row>>,
}

impl RelatedRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, table: &str, id: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(id))
    }

    /// Loads every row reachable from `rows` along `links`, one query per hop.
    /// Soft-deleted targets are included.
    pub async fn prefetch(&mut self, tx: &mut dyn Transaction, rows: &[Row], links: &[Link]) -> Result<(), DatabaseError> {
        let mut ids: Vec<String> = match links.first() {
            Some(first) => foreign_keys(rows.iter(), &first.column),
            None => return Ok(()),
        };

        for (depth, link) in links.iter().enumerate() {
            self.load(tx, link, &ids).await?;
            if let Some(next) = links.get(depth + 1) {
                let table = link.target.table.as_str();
                let reached = ids.iter().filter_map(|id| self.get(table, id));
                ids = foreign_keys(reached, &next.column);
            }
        }
        Ok(())
    }

    async fn load(&mut self, tx: &mut dyn Transaction, link: &Link, ids: &[String]) -> Result<(), DatabaseError> {
        let table = link.target.table.clone();
        let known = self.tables.entry(table).or_default();
        let missing: Vec<&String> = ids.iter().filter(|id| !known.contains_key(*id)).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let loaded = link
            .target
            .scoped(Scope::All)
            .filter(json!({ "id": { "$in": missing } }))
            .all(tx)
            .await?;
        for row in loaded {
            if let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) {
                known.insert(id, row);
            }
        }
        Ok(())
    }
}

fn foreign_keys<'r>(rows: impl Iterator<Item = &'r Row>, column: &str) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .filter_map(|row| row.get(column).and_then(Value::as_str).map(str::to_string))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models() -> Arc<ModelDef> {
        let teams = ModelDef::new("teams").columns(["name"]).build();
        let users = ModelDef::new("users").columns(["email"]).link("team", "team_id", teams).build();
        ModelDef::new("projects").columns(["name"]).link("owner", "owner_id", users).build()
    }

    #[test]
    fn compiles_linked_paths() {
        let projects = models();
        let accessor = Accessor::compile(&projects, "owner.team.name").unwrap();
        assert_eq!(accessor.links().len(), 2);
        assert_eq!(accessor.column(), "name");

        let raw_fk = Accessor::compile(&projects, "owner").unwrap();
        assert!(raw_fk.links().is_empty());
        assert_eq!(raw_fk.column(), "owner_id");
    }

    #[test]
    fn rejects_unknown_paths() {
        let projects = models();
        for path in ["owner.nope", "missing", "owner..email", "name.length"] {
            let err = Accessor::compile(&projects, path).unwrap_err();
            assert!(matches!(err, ExportError::UnknownAccessor { .. }), "{}", path);
        }
    }

    #[test]
    fn hints_follow_links() {
        let projects = models();
        assert_eq!(compile_hint(&projects, "owner__team").unwrap().len(), 2);
        assert_eq!(compile_hint(&projects, "owner").unwrap().len(), 1);
        assert!(compile_hint(&projects, "owner__nope").is_err());
    }

    #[test]
    fn linked_order_needs_a_link() {
        let projects = models();
        let order = LinkedOrder::parse(&projects, "-owner__team__name").unwrap();
        assert_eq!(order.path(), "owner.team.name");
        assert_eq!(order.sort, SortDirection::Desc);

        assert!(LinkedOrder::parse(&projects, "name").is_none());
        assert!(LinkedOrder::parse(&projects, "owner__nope").is_none());
        assert!(LinkedOrder::parse(&projects, "name__length").is_none());
        assert!(LinkedOrder::parse(&projects, "owner__").is_none());
    }

    #[test]
    fn resolves_through_loaded_rows() {
        let projects = models();
        let accessor = Accessor::compile(&projects, "owner.email").unwrap();

        let mut related = RelatedRows::new();
        related
            .tables
            .entry("users".to_string())
            .or_default()
            .insert("u1".to_string(), json!({"id": "u1", "email": "a@b.c"}).as_object().cloned().unwrap());

        let row = json!({"id": "p1", "owner_id": "u1"}).as_object().cloned().unwrap();
        assert_eq!(accessor.resolve(&row, &related), json!("a@b.c"));

        let orphan = json!({"id": "p2", "owner_id": "u9"}).as_object().cloned().unwrap();
        assert_eq!(accessor.resolve(&orphan, &related), Value::Null);
    }
}
