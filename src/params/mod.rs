//! Typed access to query-string and JSON-body parameters.

pub mod body;
pub mod query;

pub use body::BodyParams;
pub use query::QueryParams;

/// Renders options the way error messages list them: `['a', 'b']`.
pub(crate) fn options_repr(options: &[&str]) -> String {
    let quoted: Vec<String> = options.iter().map(|o| format!("'{}'", o)).collect();
    format!("[{}]", quoted.join(", "))
}
