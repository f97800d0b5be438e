use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::fields::{type_name, FieldKind, NOT_NULL, REQUIRED};
use super::{ModelSerializer, RelationDescriptor};
use crate::database::{Row, Transaction};
use crate::error::{ApiError, ErrorTree, ValidationErrors};

/// Validates `data` into the row shape `create`/`update` expect.
///
/// Nested entries are validated recursively: an entry carrying an `id` against the
/// relation's edit serializer in partial mode, anything else against its create
/// serializer. Failures come back as `ApiError::Validation` with a field-keyed tree.
pub fn validate<'a>(
    serializer: &'a dyn ModelSerializer,
    tx: &'a mut dyn Transaction,
    data: &'a Value,
    partial: bool,
) -> BoxFuture<'a, Result<Row, ApiError>> {
    async move {
        let object = match data {
            Value::Object(map) => map,
            other => {
                let mut errors = ValidationErrors::new();
                errors.non_field(format!(
                    "Invalid data. Expected a dictionary, but got {}.",
                    type_name(other)
                ));
                return Err(ApiError::validation(errors.into_tree()));
            }
        };

        let mut errors = ValidationErrors::new();
        let mut attrs = Row::new();

        for field in serializer.fields() {
            if field.read_only {
                continue;
            }
            let value = match object.get(&field.name) {
                Some(value) => value,
                None => {
                    if partial {
                        continue;
                    }
                    if let Some(default) = &field.default {
                        attrs.insert(field.name.clone(), default.clone());
                    } else if field.required {
                        errors.add(&field.name, REQUIRED);
                    }
                    continue;
                }
            };

            match field.to_internal_value(value) {
                Ok(internal) => {
                    if let FieldKind::Reference(target) = &field.kind {
                        if !internal.is_null() {
                            let exists = target.objects().filter(json!({ "id": internal })).exists(tx).await?;
                            if !exists {
                                let pk = match &internal {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                };
                                errors.add(&field.name, format!("Invalid pk \"{}\" - object does not exist.", pk));
                                continue;
                            }
                        }
                    }
                    attrs.insert(field.name.clone(), internal);
                }
                Err(message) => errors.add(&field.name, message),
            }
        }

        for relation in serializer.relations() {
            let value = match object.get(&relation.field) {
                Some(value) => value,
                None => continue,
            };

            if value.is_null() {
                if relation.allow_null {
                    attrs.insert(relation.field.clone(), Value::Null);
                } else {
                    errors.add(&relation.field, NOT_NULL);
                }
                continue;
            }

            if relation.is_many() {
                let items = match value.as_array() {
                    Some(items) => items,
                    None => {
                        errors.add(
                            &relation.field,
                            format!("Expected a list of items but got type \"{}\".", type_name(value)),
                        );
                        continue;
                    }
                };

                let mut rows = Vec::with_capacity(items.len());
                let mut trees = Vec::with_capacity(items.len());
                let mut failed = false;
                for item in items {
                    match validate_entry(relation, &mut *tx, item).await {
                        Ok(row) => {
                            rows.push(Value::Object(row));
                            trees.push(ErrorTree::Fields(BTreeMap::new()));
                        }
                        Err(ApiError::Validation(tree)) => {
                            failed = true;
                            trees.push(tree);
                        }
                        Err(e) => return Err(e),
                    }
                }
                if failed {
                    errors.nest(&relation.field, ErrorTree::List(trees));
                } else {
                    attrs.insert(relation.field.clone(), Value::Array(rows));
                }
            } else {
                match validate_entry(relation, &mut *tx, value).await {
                    Ok(row) => {
                        attrs.insert(relation.field.clone(), Value::Object(row));
                    }
                    Err(ApiError::Validation(tree)) => errors.nest(&relation.field, tree),
                    Err(e) => return Err(e),
                }
            }
        }

        if !errors.is_empty() {
            return Err(ApiError::validation(errors.into_tree()));
        }
        serializer.validate(attrs).map_err(ApiError::validation)
    }
    .boxed()
}

async fn validate_entry(
    relation: &RelationDescriptor,
    tx: &mut dyn Transaction,
    item: &Value,
) -> Result<Row, ApiError> {
    match item.get("id").filter(|id| !id.is_null()) {
        Some(id) => {
            let mut row = validate(relation.edit.as_ref(), tx, item, true).await?;
            row.entry("id").or_insert_with(|| id.clone());
            Ok(row)
        }
        None => validate(relation.create.as_ref(), tx, item, false).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, MemoryDatabase, ModelDef};
    use crate::serializer::{FieldDef, Serializer};
    use std::sync::Arc;

    fn task_serializer() -> Arc<dyn ModelSerializer> {
        let tasks = ModelDef::new("tasks").columns(["title", "order", "project_id"]).build();
        Serializer::new("TaskSerializer", tasks)
            .field(FieldDef::string("title").max_length(10))
            .build()
    }

    fn project_serializer(owner: Arc<ModelDef>) -> Serializer {
        let projects = ModelDef::new("projects").columns(["name", "owner_id"]).build();
        Serializer::new("ProjectSerializer", projects)
            .field(FieldDef::string("name"))
            .field(FieldDef::reference("owner_id", owner).nullable())
            .field(FieldDef::integer("budget").default(json!(0)))
            .relation(RelationDescriptor::many("tasks", "project_id", task_serializer()))
    }

    #[tokio::test]
    async fn collects_field_and_nested_errors() {
        let users = ModelDef::new("users").build();
        let serializer = project_serializer(users);
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();

        let data = json!({
            "owner_id": "missing",
            "tasks": [{"title": "ok"}, {"title": "far too long"}, {"id": "t1"}]
        });
        let err = validate(&serializer, tx.as_mut(), &data, false).await.unwrap_err();
        assert_eq!(
            err.to_json(),
            json!({
                "name": ["This field is required."],
                "owner_id": ["Invalid pk \"missing\" - object does not exist."],
                "tasks": [{}, {"title": ["Ensure this field has no more than 10 characters."]}, {}]
            })
        );
    }

    #[tokio::test]
    async fn defaults_partial_and_nested_ids() {
        let users = ModelDef::new("users").build();
        let serializer = project_serializer(users.clone());
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();
        let user = users.objects().create(tx.as_mut(), Row::new()).await.unwrap();

        let data = json!({"name": "Apollo", "owner_id": user["id"], "tasks": [{"id": "t1"}, {"title": "new"}]});
        let attrs = validate(&serializer, tx.as_mut(), &data, false).await.unwrap();
        assert_eq!(attrs["budget"], json!(0));
        assert_eq!(attrs["tasks"], json!([{"id": "t1"}, {"title": "new"}]));

        let attrs = validate(&serializer, tx.as_mut(), &json!({"name": "Renamed"}), true).await.unwrap();
        assert_eq!(Value::Object(attrs), json!({"name": "Renamed"}));
    }

    #[tokio::test]
    async fn rejects_non_objects_and_non_lists() {
        let serializer = project_serializer(ModelDef::new("users").build());
        let db = MemoryDatabase::new();
        let mut tx = db.begin().await.unwrap();

        let err = validate(&serializer, tx.as_mut(), &json!([1]), false).await.unwrap_err();
        assert_eq!(
            err.to_json(),
            json!({"non_field_errors": ["Invalid data. Expected a dictionary, but got list."]})
        );

        let err = validate(&serializer, tx.as_mut(), &json!({"name": "x", "tasks": {}}), false)
            .await
            .unwrap_err();
        assert_eq!(err.to_json(), json!({"tasks": ["Expected a list of items but got type \"dict\"."]}));
    }
}
