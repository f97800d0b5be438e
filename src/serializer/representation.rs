use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::{Cardinality, ModelSerializer};
use crate::database::{row_id, Row, Transaction};
use crate::error::ApiError;
use crate::filter::Scope;

/// Renders one row.
pub async fn to_representation(
    serializer: &dyn ModelSerializer,
    tx: &mut dyn Transaction,
    row: &Row,
) -> Result<Value, ApiError> {
    let rows = std::slice::from_ref(row);
    Ok(to_representation_many(serializer, tx, rows)
        .await?
        .into_iter()
        .next()
        .unwrap_or(Value::Null))
}

/// Renders rows in order, loading each relation with one query per level.
pub fn to_representation_many<'a>(
    serializer: &'a dyn ModelSerializer,
    tx: &'a mut dyn Transaction,
    rows: &'a [Row],
) -> BoxFuture<'a, Result<Vec<Value>, ApiError>> {
    async move {
        let mut out: Vec<Row> = rows.iter().map(|row| base_fields(serializer, row)).collect();
        if rows.is_empty() {
            return Ok(vec![]);
        }

        for relation in serializer.relations() {
            let target = relation.serializer.as_ref();
            let fk = relation.foreign_key.as_str();

            match relation.cardinality {
                Cardinality::One => {
                    let mut ids: Vec<&str> = rows.iter().filter_map(|r| r.get(fk).and_then(Value::as_str)).collect();
                    ids.sort_unstable();
                    ids.dedup();

                    let children = if ids.is_empty() {
                        vec![]
                    } else {
                        target
                            .model()
                            .scoped(Scope::All)
                            .filter(json!({ "id": { "$in": ids } }))
                            .all(&mut *tx)
                            .await?
                    };
                    let rendered = to_representation_many(target, &mut *tx, &children).await?;
                    let by_id: HashMap<&str, Value> = children
                        .iter()
                        .zip(rendered)
                        .filter_map(|(child, value)| row_id(child).map(|id| (id, value)))
                        .collect();

                    for (row, repr) in rows.iter().zip(out.iter_mut()) {
                        let value = row
                            .get(fk)
                            .and_then(Value::as_str)
                            .and_then(|id| by_id.get(id).cloned())
                            .unwrap_or(Value::Null);
                        repr.insert(relation.field.clone(), value);
                    }
                }
                Cardinality::Many => {
                    let parent_ids: Vec<&str> = rows.iter().filter_map(row_id).collect();
                    let mut filter = Row::new();
                    filter.insert(fk.to_string(), json!({ "$in": parent_ids }));

                    let order = if relation.ordered {
                        vec![relation.order_field.as_str(), "id"]
                    } else {
                        vec!["created_at", "id"]
                    };
                    let children = target
                        .model()
                        .scoped(Scope::Alive)
                        .filter(Value::Object(filter))
                        .order_by(order)
                        .all(&mut *tx)
                        .await?;
                    let rendered = to_representation_many(target, &mut *tx, &children).await?;

                    let mut grouped: HashMap<&str, Vec<Value>> = HashMap::new();
                    for (child, value) in children.iter().zip(rendered) {
                        if let Some(parent) = child.get(fk).and_then(Value::as_str) {
                            grouped.entry(parent).or_default().push(value);
                        }
                    }

                    for (row, repr) in rows.iter().zip(out.iter_mut()) {
                        let items = row_id(row).and_then(|id| grouped.remove(id)).unwrap_or_default();
                        repr.insert(relation.field.clone(), Value::Array(items));
                    }
                }
            }
        }

        Ok(out.into_iter().map(Value::Object).collect())
    }
    .boxed()
}

fn base_fields(serializer: &dyn ModelSerializer, row: &Row) -> Row {
    let mut repr = Row::new();
    repr.insert("id".to_string(), row.get("id").cloned().unwrap_or(Value::Null));
    for field in serializer.fields().iter().filter(|f| !f.write_only) {
        repr.insert(field.name.clone(), row.get(&field.name).cloned().unwrap_or(Value::Null));
    }
    repr
}
