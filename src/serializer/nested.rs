//! Persisting validated payloads, including nested relation reconciliation.

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use tracing::debug;

use std::sync::Arc;

use super::{ModelSerializer, NestedResult, NestedResults, RelationDescriptor};
use crate::database::{row_id, ModelDef, Row, Transaction};
use crate::error::{ApiError, ErrorTree};
use crate::filter::Scope;

/// Creates the parent row and its nested relations from validated data.
pub fn create<'a>(
    serializer: &'a dyn ModelSerializer,
    tx: &'a mut dyn Transaction,
    validated: Row,
) -> BoxFuture<'a, Result<Row, ApiError>> {
    async move {
        serializer.kind().check_create()?;
        let mut data = validated;
        let mut deferred = Vec::new();

        for relation in serializer.relations() {
            let payload = data.remove(&relation.field).filter(|v| !v.is_null());

            if payload.is_none() && !relation.allow_null {
                return Err(ErrorTree::field(&relation.field, "was not resolvable 'create'").into());
            }

            if relation.create_before_model {
                if relation.is_many() {
                    return Err(ErrorTree::field(
                        &relation.field,
                        "many not supported when 'create_before_model' is True",
                    )
                    .into());
                }
                if let Some(payload) = payload {
                    let mut child = expect_object(&relation.field, payload)?;
                    child.remove("id");
                    let created = create(relation.create.as_ref(), &mut *tx, child).await?;
                    data.insert(relation.foreign_key.clone(), created.get("id").cloned().unwrap_or(Value::Null));
                }
            } else {
                deferred.push((relation, payload));
            }
        }

        let model = serializer.model();
        let mut parent = model.objects().create(&mut *tx, data).await?;
        debug!("{} created {} {:?}", serializer.name(), model.table, row_id(&parent));

        let nested = reconcile(&mut *tx, model, &mut parent, deferred).await?;
        serializer.post_create(&mut *tx, &parent, &nested).await?;
        Ok(parent)
    }
    .boxed()
}

/// Applies validated data to `instance` and reconciles the relations present in it.
///
/// The parent row is locked first so concurrent reconciliations of the same
/// children serialize.
pub fn update<'a>(
    serializer: &'a dyn ModelSerializer,
    tx: &'a mut dyn Transaction,
    instance: &'a Row,
    validated: Row,
) -> BoxFuture<'a, Result<Row, ApiError>> {
    async move {
        serializer.kind().check_update()?;
        let model = serializer.model();
        let id = row_id(instance)
            .ok_or_else(|| ApiError::internal_server_error("Cannot update a row without an id"))?
            .to_string();

        let mut data = validated;
        data.remove("id");
        let mut deferred = Vec::new();

        for relation in serializer.relations() {
            let payload = data.remove(&relation.field).filter(|v| !v.is_null());

            if relation.create_before_model {
                return Err(ErrorTree::field(&relation.field, "'create_before_model' not supported on Edit").into());
            }
            if payload.is_some() || relation.allow_null {
                deferred.push((relation, payload));
            }
        }

        model
            .scoped(Scope::All)
            .filter(json!({ "id": id }))
            .select_for_update()
            .get(&mut *tx)
            .await?;

        let mut parent = model.all_objects().update_instance(&mut *tx, &id, data).await?;
        let nested = reconcile(&mut *tx, model, &mut parent, deferred).await?;
        serializer.post_update(&mut *tx, &parent, &nested).await?;
        Ok(parent)
    }
    .boxed()
}

async fn reconcile(
    tx: &mut dyn Transaction,
    model: &Arc<ModelDef>,
    parent: &mut Row,
    relations: Vec<(&RelationDescriptor, Option<Value>)>,
) -> Result<NestedResults, ApiError> {
    let mut results = NestedResults::new();
    for (relation, payload) in relations {
        let result = if relation.is_many() {
            let items = match payload {
                Some(Value::Array(items)) => items
                    .into_iter()
                    .map(|item| expect_object(&relation.field, item))
                    .collect::<Result<Vec<_>, _>>()?,
                Some(other) => return Err(not_a_list(&relation.field, &other)),
                None => {
                    results.insert(relation.field.clone(), NestedResult::Many(vec![]));
                    continue;
                }
            };
            NestedResult::Many(sync_many(tx, parent, relation, items).await?)
        } else {
            let payload = payload.map(|p| expect_object(&relation.field, p)).transpose()?;
            NestedResult::One(sync_one(tx, model, parent, relation, payload).await?)
        };
        results.insert(relation.field.clone(), result);
    }
    Ok(results)
}

/// One-to-one: the parent's `foreign_key` column points at the child.
async fn sync_one(
    tx: &mut dyn Transaction,
    model: &Arc<ModelDef>,
    parent: &mut Row,
    relation: &RelationDescriptor,
    payload: Option<Row>,
) -> Result<Option<Row>, ApiError> {
    let fk = relation.foreign_key.as_str();
    let parent_id = row_id(parent).unwrap_or_default().to_string();

    let mut data = match payload {
        Some(data) => data,
        None => {
            // The previously linked row is left in place
            let mut changes = Row::new();
            changes.insert(fk.to_string(), Value::Null);
            *parent = model.all_objects().update_instance(tx, &parent_id, changes).await?;
            return Ok(None);
        }
    };

    let linked_id = parent.get(fk).and_then(Value::as_str).map(str::to_string);
    if let (Some(linked), Some(submitted)) = (&linked_id, data.get("id")) {
        if submitted.as_str() != Some(linked.as_str()) {
            return Err(ApiError::field_error(
                &relation.field,
                format!("This {} does not belong to this object", relation.field),
            ));
        }
    }

    let child_model = relation.edit.model().clone();
    let existing = match &linked_id {
        Some(linked) => child_model.scoped(Scope::All).filter(json!({ "id": linked })).first(tx).await?,
        None => None,
    };

    if let Some(existing) = existing {
        data.remove("id");
        let updated = super::update(relation.edit.as_ref(), tx, &existing, data).await?;
        return Ok(Some(updated));
    }

    data.remove("id");
    if let Some(parent_field) = &relation.parent_field {
        if relation.create.model().has_column(parent_field) {
            data.insert(parent_field.clone(), parent.get("id").cloned().unwrap_or(Value::Null));
        } else {
            data.remove(parent_field);
        }
    }
    let created = create(relation.create.as_ref(), tx, data).await?;

    let mut changes = Row::new();
    changes.insert(fk.to_string(), created.get("id").cloned().unwrap_or(Value::Null));
    *parent = model.all_objects().update_instance(tx, &parent_id, changes).await?;
    Ok(Some(created))
}

/// To-many: every child's `foreign_key` column points at the parent. Children not
/// named in the payload are removed; the rest are updated or created in order.
async fn sync_many(
    tx: &mut dyn Transaction,
    parent: &Row,
    relation: &RelationDescriptor,
    items: Vec<Row>,
) -> Result<Vec<Row>, ApiError> {
    let parent_id = parent.get("id").cloned().unwrap_or(Value::Null);
    let fk = relation.foreign_key.as_str();
    let child_model = relation.create.model().clone();

    let ids: Vec<Value> = items
        .iter()
        .filter_map(|item| item.get("id").filter(|id| !id.is_null()).cloned())
        .collect();

    let mut owner = Row::new();
    owner.insert(fk.to_string(), parent_id.clone());
    let siblings = child_model.scoped(Scope::All).filter(Value::Object(owner));
    let removed = siblings
        .clone()
        .exclude(json!({ "id": { "$in": ids } }))
        .hard_delete(tx)
        .await?;
    if removed > 0 {
        debug!("Removed {} {} no longer listed under {}", removed, child_model.table, relation.field);
    }

    let owned = siblings.filter(json!({ "id": { "$in": ids } })).count(tx).await?;
    if owned != ids.len() as i64 {
        return Err(ApiError::field_error(
            &relation.field,
            format!(
                "One or more {} does not belong to this {}",
                relation.field,
                relation.parent_name()
            ),
        ));
    }

    let mut children = Vec::with_capacity(items.len());
    for (index, mut item) in items.into_iter().enumerate() {
        if relation.ordered {
            item.insert(relation.order_field.clone(), json!(index));
        }
        item.insert(fk.to_string(), parent_id.clone());
        item.insert("deleted_at".to_string(), Value::Null);

        let child = match item.remove("id").filter(|id| !id.is_null()) {
            Some(id) => {
                let existing = child_model.scoped(Scope::All).filter(json!({ "id": id })).get(tx).await?;
                super::update(relation.edit.as_ref(), tx, &existing, item).await?
            }
            None => create(relation.create.as_ref(), tx, item).await?,
        };
        children.push(child);
    }
    Ok(children)
}

fn expect_object(field: &str, value: Value) -> Result<Row, ApiError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ErrorTree::field(
            field,
            format!(
                "Invalid data. Expected a dictionary, but got {}.",
                super::fields::type_name(&other)
            ),
        )
        .into()),
    }
}

fn not_a_list(field: &str, value: &Value) -> ApiError {
    ErrorTree::field(
        field,
        format!(
            "Expected a list of items but got type \"{}\".",
            super::fields::type_name(value)
        ),
    )
    .into()
}
