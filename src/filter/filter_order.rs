use serde_json::Value;

use super::error::{validate_column, FilterError};
use super::types::{FilterOrderInfo, SortDirection};

pub struct FilterOrder;

impl FilterOrder {
    pub fn validate_and_parse(order: &Value) -> Result<Vec<FilterOrderInfo>, FilterError> {
        let parsed = match order {
            Value::Null => vec![],
            Value::String(s) => Self::parse_order_string(s),
            Value::Array(arr) => {
                // ["created_at desc", "-name"]
                let mut out = Vec::new();
                for v in arr {
                    match v {
                        Value::String(s) => out.extend(Self::parse_order_string(s)),
                        other => return Err(FilterError::InvalidOrder(format!("expected string, got {}", other))),
                    }
                }
                out
            }
            Value::Object(obj) => {
                // { "created_at": "desc", "name": "asc" }
                let mut out = Vec::new();
                for (k, v) in obj {
                    let sort = match v.as_str().unwrap_or("asc").to_ascii_lowercase().as_str() {
                        "desc" => SortDirection::Desc,
                        _ => SortDirection::Asc,
                    };
                    out.push(FilterOrderInfo { column: k.clone(), sort });
                }
                out
            }
            other => return Err(FilterError::InvalidOrder(other.to_string())),
        };

        for info in &parsed {
            validate_column(&info.column)?;
        }
        Ok(parsed)
    }

    /// Accepts both `"name desc"` and the `"-name"` shorthand, comma separated.
    fn parse_order_string(s: &str) -> Vec<FilterOrderInfo> {
        let mut out = Vec::new();
        for part in s.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() { continue; }
            let mut it = trimmed.split_whitespace();
            if let Some(col) = it.next() {
                let mut info = FilterOrderInfo::from_field(col);
                if let Some(dir) = it.next() {
                    if dir.eq_ignore_ascii_case("desc") {
                        info.sort = SortDirection::Desc;
                    }
                }
                out.push(info);
            }
        }
        out
    }

    pub fn generate(infos: &[FilterOrderInfo]) -> Result<String, FilterError> {
        if infos.is_empty() { return Ok(String::new()); }
        let mut parts = Vec::with_capacity(infos.len());
        for info in infos {
            validate_column(&info.column)?;
            parts.push(format!("\"{}\" {}", info.column, info.sort.to_sql()));
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_prefix_and_suffix_directions() {
        let infos = FilterOrder::validate_and_parse(&json!("-created_at, name asc, order desc")).unwrap();
        assert_eq!(
            FilterOrder::generate(&infos).unwrap(),
            "ORDER BY \"created_at\" DESC, \"name\" ASC, \"order\" DESC"
        );
    }

    #[test]
    fn dotted_paths_are_not_columns() {
        assert!(FilterOrder::validate_and_parse(&json!("owner.name")).is_err());
        assert!(FilterOrder::validate_and_parse(&json!(["name", 3])).is_err());
    }
}
