// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::database::manager::DatabaseError;
use crate::filter::error::FilterError;

/// Field-keyed validation errors. Nested serializers contribute whole subtrees,
/// to-many relations contribute one tree per submitted item.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorTree {
    Message(String),
    List(Vec<ErrorTree>),
    Fields(BTreeMap<String, ErrorTree>),
}

impl ErrorTree {
    pub fn message(text: impl Into<String>) -> Self {
        ErrorTree::Message(text.into())
    }

    /// `{field: [text]}`
    pub fn field(field: impl Into<String>, text: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(field.into(), ErrorTree::List(vec![ErrorTree::message(text)]));
        ErrorTree::Fields(fields)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ErrorTree::Message(_) => false,
            ErrorTree::List(items) => items.iter().all(ErrorTree::is_empty),
            ErrorTree::Fields(fields) => fields.values().all(ErrorTree::is_empty),
        }
    }

    /// Renders the tree as the wire format: strings, lists and objects only.
    pub fn to_json(&self) -> Value {
        match self {
            ErrorTree::Message(text) => Value::String(text.clone()),
            ErrorTree::List(items) => Value::Array(items.iter().map(ErrorTree::to_json).collect()),
            ErrorTree::Fields(fields) => {
                let mut map = Map::new();
                for (key, tree) in fields {
                    map.insert(key.clone(), tree.to_json());
                }
                Value::Object(map)
            }
        }
    }

    /// Collapses the tree into one line, e.g. for log output.
    pub fn flatten(&self) -> String {
        match self {
            ErrorTree::Message(text) => text.clone(),
            ErrorTree::List(items) => items
                .iter()
                .filter(|t| !t.is_empty())
                .map(ErrorTree::flatten)
                .collect::<Vec<_>>()
                .join("; "),
            ErrorTree::Fields(fields) => fields
                .iter()
                .filter(|(_, t)| !t.is_empty())
                .map(|(k, t)| format!("{}: {}", k, t.flatten()))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

/// Accumulates per-field messages while a payload is being validated.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    fields: BTreeMap<String, ErrorTree>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, text: impl Into<String>) {
        let entry = self
            .fields
            .entry(field.into())
            .or_insert_with(|| ErrorTree::List(vec![]));
        match entry {
            ErrorTree::List(items) => items.push(ErrorTree::message(text)),
            other => *other = ErrorTree::List(vec![ErrorTree::message(text)]),
        }
    }

    pub fn non_field(&mut self, text: impl Into<String>) {
        self.add("non_field_errors", text);
    }

    /// Attach a nested serializer's errors under its field key.
    pub fn nest(&mut self, field: impl Into<String>, tree: ErrorTree) {
        if !tree.is_empty() {
            self.fields.insert(field.into(), tree);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn into_tree(self) -> ErrorTree {
        ErrorTree::Fields(self.fields)
    }
}

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    Validation(ErrorTree),
    InvalidJson(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 500 for wiring mistakes (e.g. a view without the serializer it needs)
    Misconfigured(String),

    // Arbitrary status with a pre-shaped JSON body
    Custom { status: StatusCode, body: Value },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Misconfigured(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Custom { status, .. } => *status,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Misconfigured(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
            ApiError::Validation(tree) => tree.flatten(),
            ApiError::Custom { body, .. } => match body {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            ApiError::Validation(tree) => tree.to_json(),
            ApiError::Custom { body, .. } => body.clone(),
            _ => message_body(self.message()),
        }
    }
}

/// `{<message_key>: text}` using the configured key (default `detail`).
pub fn message_body(text: impl Into<String>) -> Value {
    let key = crate::config::config().api.message_key.clone();
    let mut map = Map::new();
    map.insert(key, Value::String(text.into()));
    Value::Object(map)
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation(tree: ErrorTree) -> Self {
        ApiError::Validation(tree)
    }

    /// 400 with `{field: text}`, used for nested ownership conflicts.
    pub fn field_error(field: impl Into<String>, text: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert(field.into(), Value::String(text.into()));
        ApiError::Custom {
            status: StatusCode::BAD_REQUEST,
            body: Value::Object(body),
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn misconfigured(message: impl Into<String>) -> Self {
        ApiError::Misconfigured(message.into())
    }

    pub fn custom(status: StatusCode, body: Value) -> Self {
        ApiError::Custom { status, body }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<ErrorTree> for ApiError {
    fn from(tree: ErrorTree) -> Self {
        ApiError::Validation(tree)
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(msg) => ApiError::not_found(msg),
            DatabaseError::UniqueViolation(msg) => ApiError::bad_request(msg),
            DatabaseError::UnknownColumn { table, column } => {
                ApiError::bad_request(format!("Unknown field '{}' on {}", column, table))
            }
            DatabaseError::Filter(e) => e.into(),
            DatabaseError::ConfigMissing(_) | DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("Database configuration error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::MultipleObjectsReturned(msg) => {
                tracing::error!("Ambiguous lookup: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            DatabaseError::QueryError(msg) => {
                // Don't expose internal SQL errors to clients
                tracing::error!("Database query error: {}", msg);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
            DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_errors_render_under_field_key() {
        let mut child = ValidationErrors::new();
        child.add("name", "This field is required.");

        let mut errors = ValidationErrors::new();
        errors.nest(
            "tasks",
            ErrorTree::List(vec![ErrorTree::Fields(BTreeMap::new()), child.into_tree()]),
        );

        let json = ApiError::from(errors.into_tree()).to_json();
        assert_eq!(json, json!({"tasks": [{}, {"name": ["This field is required."]}]}));
    }

    #[test]
    fn empty_nested_trees_are_skipped() {
        let mut errors = ValidationErrors::new();
        errors.nest("tasks", ErrorTree::List(vec![ErrorTree::Fields(BTreeMap::new())]));
        assert!(errors.is_empty());
    }

    #[test]
    fn message_errors_use_configured_key() {
        let err = ApiError::forbidden("You do not have permission to access this");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.to_json(), json!({"detail": "You do not have permission to access this"}));
    }

    #[test]
    fn field_error_is_bad_request_with_field_body() {
        let err = ApiError::field_error("settings", "This settings does not belong to this object");
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.to_json(), json!({"settings": "This settings does not belong to this object"}));
    }

    #[test]
    fn sql_errors_are_hidden() {
        let err: ApiError = DatabaseError::QueryError("syntax error at or near".into()).into();
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message().contains("syntax"));
    }
}
