use serde_json::Value;

use super::options_repr;
use crate::error::ApiError;

/// Accessors over a JSON request body.
///
/// In `require_*` mode a missing key and a falsy value (`null`, `false`, `0`, `""`,
/// `[]`, `{}`) are both rejected with "<key> is required.".
#[derive(Debug, Clone, Copy)]
pub struct BodyParams<'a> {
    data: &'a Value,
}

impl<'a> BodyParams<'a> {
    pub fn new(data: &'a Value) -> Self {
        Self { data }
    }

    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.data.get(key)
    }

    pub fn require(&self, key: &str) -> Result<&'a Value, ApiError> {
        match self.get(key) {
            Some(value) if is_truthy(value) => Ok(value),
            _ => Err(required(key)),
        }
    }

    pub fn get_int(&self, key: &str, default: Option<i64>) -> Option<i64> {
        self.get(key).and_then(as_int).or(default)
    }

    pub fn require_int(&self, key: &str) -> Result<i64, ApiError> {
        as_int(self.require(key)?)
            .ok_or_else(|| ApiError::bad_request(format!("{} value must be a valid integer", key)))
    }

    pub fn get_str(&self, key: &str, default: Option<&str>) -> Option<String> {
        self.get(key)
            .and_then(Value::as_str)
            .or(default)
            .map(str::to_string)
    }

    pub fn require_str(&self, key: &str) -> Result<String, ApiError> {
        self.require(key)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request(format!("{} value must be a string", key)))
    }

    pub fn get_enum(&self, key: &str, options: &[&str], default: Option<&str>) -> Option<String> {
        match self.get(key).and_then(Value::as_str) {
            Some(value) if options.contains(&value) => Some(value.to_string()),
            _ => default.map(str::to_string),
        }
    }

    pub fn require_enum(&self, key: &str, options: &[&str]) -> Result<String, ApiError> {
        let value = self.require(key)?;
        match value.as_str() {
            Some(s) if options.contains(&s) => Ok(s.to_string()),
            _ => Err(ApiError::bad_request(format!(
                "Invalid value {}, must be one of {}",
                display(value),
                options_repr(options)
            ))),
        }
    }

    /// `Ok(None)` when the key is absent; anything but an array of strings is rejected.
    pub fn get_str_list(&self, key: &str) -> Result<Option<Vec<String>>, ApiError> {
        match self.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => string_list(key, value).map(Some),
        }
    }

    pub fn require_str_list(&self, key: &str) -> Result<Vec<String>, ApiError> {
        string_list(key, self.require(key)?)
    }
}

fn required(key: &str) -> ApiError {
    ApiError::bad_request(format!("{} is required.", key))
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>, ApiError> {
    value
        .as_array()
        .and_then(|items| items.iter().map(|i| i.as_str().map(str::to_string)).collect())
        .ok_or_else(|| {
            ApiError::bad_request(format!("Invalid data format. Expected a list of strings for {}", key))
        })
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
