//! Relation-aware model serializers.
//!
//! A serializer validates a JSON payload against declared fields, persists it
//! together with any nested relations, and renders stored rows back to JSON.
//! Relations are declared up front as `RelationDescriptor`s.

pub mod fields;
pub mod nested;
pub mod relation;
pub mod representation;
pub mod validation;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::database::{ModelDef, Row, Transaction};
use crate::error::{ApiError, ErrorTree};

pub use fields::{FieldDef, FieldKind};
pub use nested::{create, update};
pub use relation::{Cardinality, RelationDescriptor};
pub use representation::{to_representation, to_representation_many};
pub use validation::validate;

/// Restricts which persistence operations a serializer may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializerKind {
    Model,
    Create,
    Edit,
    List,
    Validate,
}

impl SerializerKind {
    fn label(&self) -> &'static str {
        match self {
            SerializerKind::Model => "Model",
            SerializerKind::Create => "Create Model",
            SerializerKind::Edit => "Edit Model",
            SerializerKind::List => "List Model",
            SerializerKind::Validate => "Validate Model",
        }
    }

    pub fn check_create(&self) -> Result<(), ApiError> {
        match self {
            SerializerKind::Model | SerializerKind::Create => Ok(()),
            _ => Err(ApiError::misconfigured(format!(
                "{} Serializer does not support 'create'",
                self.label()
            ))),
        }
    }

    pub fn check_update(&self) -> Result<(), ApiError> {
        match self {
            SerializerKind::Model | SerializerKind::Edit => Ok(()),
            _ => Err(ApiError::misconfigured(format!(
                "{} Serializer does not support 'update'",
                self.label()
            ))),
        }
    }
}

/// What reconciliation produced for one relation.
#[derive(Debug, Clone, PartialEq)]
pub enum NestedResult {
    One(Option<Row>),
    Many(Vec<Row>),
}

pub type NestedResults = BTreeMap<String, NestedResult>;

/// A payload shape for one model. Implement it directly to hook into
/// `post_create`/`post_update`, or use the `Serializer` builder.
#[async_trait]
pub trait ModelSerializer: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &Arc<ModelDef>;

    fn kind(&self) -> SerializerKind {
        SerializerKind::Model
    }

    fn fields(&self) -> &[FieldDef];

    fn relations(&self) -> &[RelationDescriptor] {
        &[]
    }

    /// Cross-field validation, run after every field passed.
    fn validate(&self, attrs: Row) -> Result<Row, ErrorTree> {
        Ok(attrs)
    }

    async fn post_create(
        &self,
        _tx: &mut dyn Transaction,
        _row: &Row,
        _nested: &NestedResults,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn post_update(
        &self,
        _tx: &mut dyn Transaction,
        _row: &Row,
        _nested: &NestedResults,
    ) -> Result<(), ApiError> {
        Ok(())
    }
}

type Validator = Arc<dyn Fn(Row) -> Result<Row, ErrorTree> + Send + Sync>;

/// Declarative serializer: fields, relations and attrs validators.
#[derive(Clone)]
pub struct Serializer {
    name: String,
    model: Arc<ModelDef>,
    kind: SerializerKind,
    fields: Vec<FieldDef>,
    relations: Vec<RelationDescriptor>,
    validators: Vec<Validator>,
}

impl Serializer {
    pub fn new(name: impl Into<String>, model: Arc<ModelDef>) -> Self {
        Self {
            name: name.into(),
            model,
            kind: SerializerKind::Model,
            fields: vec![],
            relations: vec![],
            validators: vec![],
        }
    }

    pub fn of_kind(mut self, kind: SerializerKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_fields<I: IntoIterator<Item = FieldDef>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Adds an attrs validator; validators run in declaration order.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(Row) -> Result<Row, ErrorTree> + Send + Sync + 'static,
    {
        self.validators.push(Arc::new(validator));
        self
    }

    pub fn build(self) -> Arc<dyn ModelSerializer> {
        Arc::new(self)
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("name", &self.name)
            .field("model", &self.model.table)
            .field("kind", &self.kind)
            .field("fields", &self.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>())
            .field("relations", &self.relations)
            .finish()
    }
}

#[async_trait]
impl ModelSerializer for Serializer {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    fn kind(&self) -> SerializerKind {
        self.kind
    }

    fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    fn relations(&self) -> &[RelationDescriptor] {
        &self.relations
    }

    fn validate(&self, attrs: Row) -> Result<Row, ErrorTree> {
        self.validators.iter().try_fold(attrs, |attrs, validator| validator(attrs))
    }
}

/// Field-keyed error for enum-like values checked inside a validator.
pub fn validate_enum_field(key: &str, value: &Value, options: &[&str]) -> Result<(), ErrorTree> {
    if !crate::params::body::is_truthy(value) {
        return Ok(());
    }
    match value.as_str() {
        Some(s) if options.contains(&s) => Ok(()),
        _ => Err(ErrorTree::field(
            key,
            format!("{} needs to be one of {}", key, crate::params::options_repr(options)),
        )),
    }
}
