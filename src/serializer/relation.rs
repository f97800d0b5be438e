use std::fmt;
use std::sync::Arc;

use super::ModelSerializer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// `foreign_key` is a column on the parent holding the child's id.
    One,
    /// `foreign_key` is a column on each child holding the parent's id.
    Many,
}

/// A nested relation declared by a serializer.
///
/// `serializer` renders the relation; `create` and `edit` persist submitted
/// entries and default to `serializer` when not set.
#[derive(Clone)]
pub struct RelationDescriptor {
    pub field: String,
    pub cardinality: Cardinality,
    pub foreign_key: String,
    /// Column on a one-to-one child pointing back at the parent, filled on create.
    pub parent_field: Option<String>,
    pub create_before_model: bool,
    pub ordered: bool,
    pub order_field: String,
    pub allow_null: bool,
    pub serializer: Arc<dyn ModelSerializer>,
    pub create: Arc<dyn ModelSerializer>,
    pub edit: Arc<dyn ModelSerializer>,
}

impl RelationDescriptor {
    fn new(
        field: impl Into<String>,
        cardinality: Cardinality,
        foreign_key: impl Into<String>,
        serializer: Arc<dyn ModelSerializer>,
    ) -> Self {
        Self {
            field: field.into(),
            cardinality,
            foreign_key: foreign_key.into(),
            parent_field: None,
            create_before_model: false,
            ordered: cardinality == Cardinality::Many,
            order_field: "order".to_string(),
            allow_null: false,
            create: serializer.clone(),
            edit: serializer.clone(),
            serializer,
        }
    }

    pub fn one(field: impl Into<String>, foreign_key: impl Into<String>, serializer: Arc<dyn ModelSerializer>) -> Self {
        Self::new(field, Cardinality::One, foreign_key, serializer)
    }

    pub fn many(field: impl Into<String>, foreign_key: impl Into<String>, serializer: Arc<dyn ModelSerializer>) -> Self {
        Self::new(field, Cardinality::Many, foreign_key, serializer)
    }

    pub fn create_with(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.create = serializer;
        self
    }

    pub fn edit_with(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.edit = serializer;
        self
    }

    pub fn parent_field(mut self, column: impl Into<String>) -> Self {
        self.parent_field = Some(column.into());
        self
    }

    pub fn create_before_model(mut self) -> Self {
        self.create_before_model = true;
        self
    }

    pub fn ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn order_field(mut self, column: impl Into<String>) -> Self {
        self.order_field = column.into();
        self
    }

    pub fn allow_null(mut self) -> Self {
        self.allow_null = true;
        self
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Name used for the parent in ownership messages: `project_id` reads as `project`.
    pub fn parent_name(&self) -> &str {
        self.foreign_key.strip_suffix("_id").unwrap_or(&self.foreign_key)
    }
}

impl fmt::Debug for RelationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationDescriptor")
            .field("field", &self.field)
            .field("cardinality", &self.cardinality)
            .field("foreign_key", &self.foreign_key)
            .field("parent_field", &self.parent_field)
            .field("create_before_model", &self.create_before_model)
            .field("ordered", &self.ordered)
            .field("allow_null", &self.allow_null)
            .field("serializer", &self.serializer.name())
            .finish()
    }
}
