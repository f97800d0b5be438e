use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, NaiveDate, Utc};
use std::convert::Infallible;

use super::options_repr;
use crate::dates;
use crate::error::ApiError;

/// Decoded query string. Repeated keys resolve to the last value.
///
/// The `get_*` accessors are lenient: absent or malformed values fall back to the
/// given default. The `require_*` accessors turn the same cases into a 400.
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(k, _)| k == key)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> Result<&str, ApiError> {
        self.get(key)
            .ok_or_else(|| ApiError::bad_request(format!("{} not found", key)))
    }

    pub fn get_str(&self, key: &str, default: Option<&str>) -> Option<String> {
        self.get(key).or(default).map(str::to_string)
    }

    /// Only `true`/`false` (any case) are recognised.
    pub fn get_bool(&self, key: &str, default: Option<bool>) -> Option<bool> {
        self.get(key).and_then(parse_bool).or(default)
    }

    pub fn require_bool(&self, key: &str) -> Result<bool, ApiError> {
        parse_bool(self.require(key)?)
            .ok_or_else(|| ApiError::bad_request(format!("{} value must be true or false", key)))
    }

    pub fn get_int(&self, key: &str, default: Option<i64>) -> Option<i64> {
        self.get(key).and_then(|v| v.trim().parse().ok()).or(default)
    }

    pub fn require_int(&self, key: &str) -> Result<i64, ApiError> {
        self.require(key)?
            .trim()
            .parse()
            .map_err(|_| ApiError::bad_request(format!("{} value must be a valid integer", key)))
    }

    pub fn get_float(&self, key: &str, default: Option<f64>) -> Option<f64> {
        self.get(key).and_then(|v| v.trim().parse().ok()).or(default)
    }

    pub fn require_float(&self, key: &str) -> Result<f64, ApiError> {
        self.require(key)?
            .trim()
            .parse()
            .map_err(|_| ApiError::bad_request(format!("{} value must be a valid float", key)))
    }

    /// Comma separated values; a trailing comma is ignored and blank input yields the default.
    pub fn get_str_list(&self, key: &str, default: Option<Vec<String>>) -> Option<Vec<String>> {
        self.get(key).and_then(split_list).or(default)
    }

    pub fn require_str_list(&self, key: &str) -> Result<Vec<String>, ApiError> {
        split_list(self.require(key)?).ok_or_else(|| ApiError::bad_request(format!("{} not found", key)))
    }

    pub fn get_int_list(&self, key: &str, default: Option<Vec<i64>>) -> Option<Vec<i64>> {
        self.get(key)
            .and_then(split_list)
            .and_then(|items| items.iter().map(|i| i.trim().parse().ok()).collect())
            .or(default)
    }

    pub fn require_int_list(&self, key: &str) -> Result<Vec<i64>, ApiError> {
        self.require_str_list(key)?
            .iter()
            .map(|i| i.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ApiError::bad_request(format!("{} contained an invalid integer", key)))
    }

    pub fn get_enum(&self, key: &str, options: &[&str], default: Option<&str>) -> Option<String> {
        match self.get(key) {
            Some(value) if options.contains(&value) => Some(value.to_string()),
            _ => default.map(str::to_string),
        }
    }

    pub fn require_enum(&self, key: &str, options: &[&str]) -> Result<String, ApiError> {
        let value = self.require(key)?;
        if options.contains(&value) {
            Ok(value.to_string())
        } else {
            Err(ApiError::bad_request(format!(
                "Invalid value {}, must be one of {}",
                value,
                options_repr(options)
            )))
        }
    }

    /// Every item must be one of `options`; a single stray item rejects the list.
    pub fn get_enum_list(&self, key: &str, options: &[&str], default: Option<Vec<String>>) -> Option<Vec<String>> {
        match self.get_str_list(key, None) {
            Some(items) if items.iter().all(|i| options.contains(&i.as_str())) => Some(items),
            _ => default,
        }
    }

    pub fn require_enum_list(&self, key: &str, options: &[&str]) -> Result<Vec<String>, ApiError> {
        let items = self.require_str_list(key)?;
        if let Some(item) = items.iter().find(|i| !options.contains(&i.as_str())) {
            return Err(ApiError::bad_request(format!(
                "Invalid value '{}', must be one of {}",
                item,
                options_repr(options)
            )));
        }
        Ok(items)
    }

    pub fn get_datetime(&self, key: &str, default: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        self.get(key).and_then(|v| dates::parse(v).ok()).or(default)
    }

    pub fn require_datetime(&self, key: &str) -> Result<DateTime<Utc>, ApiError> {
        dates::parse(self.require(key)?).map_err(|e| ApiError::bad_request(e.to_string()))
    }

    pub fn get_date(&self, key: &str, default: Option<NaiveDate>) -> Option<NaiveDate> {
        self.get(key).and_then(|v| dates::parse_date(v).ok()).or(default)
    }

    pub fn require_date(&self, key: &str) -> Result<NaiveDate, ApiError> {
        dates::parse_date(self.require(key)?).map_err(|e| ApiError::bad_request(e.to_string()))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn split_list(source: &str) -> Option<Vec<String>> {
    let source = source.trim().trim_end_matches(',');
    if source.is_empty() {
        return None;
    }
    Some(source.split(',').map(str::to_string).collect())
}

#[async_trait]
impl<S> FromRequestParts<S> for QueryParams
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(QueryParams::parse(parts.uri.query()))
    }
}
