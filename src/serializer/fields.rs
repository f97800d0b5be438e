use chrono::SecondsFormat;
use serde_json::{Number, Value};
use std::sync::Arc;

use crate::database::ModelDef;
use crate::dates;
use crate::params::options_repr;

pub const REQUIRED: &str = "This field is required.";
pub const NOT_NULL: &str = "This field may not be null.";

#[derive(Debug, Clone)]
pub enum FieldKind {
    Str { max_length: Option<usize>, allow_blank: bool },
    Integer { min_value: Option<i64>, max_value: Option<i64> },
    Float,
    Boolean,
    Enum(Vec<String>),
    Date,
    DateTime,
    /// Id of a row in another model; existence is checked at validation time.
    Reference(Arc<ModelDef>),
    Json,
}

/// One declared column of a serializer.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub nullable: bool,
    pub read_only: bool,
    pub write_only: bool,
    pub default: Option<Value>,
}

impl FieldDef {
    fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            nullable: false,
            read_only: false,
            write_only: false,
            default: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Str { max_length: None, allow_blank: false })
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Integer { min_value: None, max_value: None })
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    /// The first option is the default, as with the enum model field.
    pub fn enumeration(name: impl Into<String>, options: &[&str]) -> Self {
        let mut field = Self::new(name, FieldKind::Enum(options.iter().map(|o| o.to_string()).collect()));
        field.default = options.first().map(|o| Value::String(o.to_string()));
        field
    }

    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Date)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    pub fn reference(name: impl Into<String>, target: Arc<ModelDef>) -> Self {
        Self::new(name, FieldKind::Reference(target))
    }

    pub fn json(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Json)
    }

    pub fn max_length(mut self, max: usize) -> Self {
        if let FieldKind::Str { max_length, .. } = &mut self.kind {
            *max_length = Some(max);
        }
        self
    }

    pub fn allow_blank(mut self) -> Self {
        if let FieldKind::Str { allow_blank, .. } = &mut self.kind {
            *allow_blank = true;
        }
        self
    }

    pub fn min_value(mut self, min: i64) -> Self {
        if let FieldKind::Integer { min_value, .. } = &mut self.kind {
            *min_value = Some(min);
        }
        self
    }

    pub fn max_value(mut self, max: i64) -> Self {
        if let FieldKind::Integer { max_value, .. } = &mut self.kind {
            *max_value = Some(max);
        }
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self.required = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self.required = false;
        self
    }

    pub fn write_only(mut self) -> Self {
        self.write_only = true;
        self
    }

    pub fn default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self.required = false;
        self
    }

    /// Converts a submitted value into its stored form.
    ///
    /// Reference fields only get a type check here; existence needs a transaction.
    pub fn to_internal_value(&self, value: &Value) -> Result<Value, String> {
        if value.is_null() {
            return if self.nullable { Ok(Value::Null) } else { Err(NOT_NULL.to_string()) };
        }

        match &self.kind {
            FieldKind::Str { max_length, allow_blank } => {
                let text = match value {
                    Value::String(s) => s.trim().to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => return Err("Not a valid string.".to_string()),
                };
                if text.is_empty() && !allow_blank {
                    return Err("This field may not be blank.".to_string());
                }
                if let Some(max) = max_length {
                    if text.chars().count() > *max {
                        return Err(format!("Ensure this field has no more than {} characters.", max));
                    }
                }
                Ok(Value::String(text))
            }
            FieldKind::Integer { min_value, max_value } => {
                let n = as_integer(value).ok_or_else(|| "A valid integer is required.".to_string())?;
                if let Some(min) = min_value {
                    if n < *min {
                        return Err(format!("Ensure this value is greater than or equal to {}.", min));
                    }
                }
                if let Some(max) = max_value {
                    if n > *max {
                        return Err(format!("Ensure this value is less than or equal to {}.", max));
                    }
                }
                Ok(Value::from(n))
            }
            FieldKind::Float => {
                let f = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                f.and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| "A valid number is required.".to_string())
            }
            FieldKind::Boolean => as_boolean(value)
                .map(Value::Bool)
                .ok_or_else(|| "Must be a valid boolean.".to_string()),
            FieldKind::Enum(options) => {
                if !crate::params::body::is_truthy(value) {
                    return Ok(value.clone());
                }
                match value.as_str() {
                    Some(s) if options.iter().any(|o| o == s) => Ok(value.clone()),
                    _ => {
                        let options: Vec<&str> = options.iter().map(String::as_str).collect();
                        Err(format!("{} needs to be one of {}", self.name, options_repr(&options)))
                    }
                }
            }
            FieldKind::Date => value
                .as_str()
                .and_then(|s| chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| "Date has wrong format. Use one of these formats instead: YYYY-MM-DD.".to_string()),
            FieldKind::DateTime => value
                .as_str()
                .and_then(|s| dates::parse(s).ok())
                .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Micros, true)))
                .ok_or_else(|| {
                    "Datetime has wrong format. Use one of these formats instead: YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].".to_string()
                }),
            FieldKind::Reference(_) => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                other => Err(format!("Incorrect type. Expected pk value, received {}.", type_name(other))),
            },
            FieldKind::Json => Ok(value.clone()),
        }
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_boolean(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(1) => Some(true),
            Some(0) => Some(false),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Type names as they appear in client-facing messages.
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "NoneType",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings() {
        let name = FieldDef::string("name").max_length(5);
        assert_eq!(name.to_internal_value(&json!("  ab ")).unwrap(), json!("ab"));
        assert_eq!(name.to_internal_value(&json!(12)).unwrap(), json!("12"));
        assert_eq!(name.to_internal_value(&json!("")).unwrap_err(), "This field may not be blank.");
        assert_eq!(
            name.to_internal_value(&json!("abcdef")).unwrap_err(),
            "Ensure this field has no more than 5 characters."
        );
        assert_eq!(name.to_internal_value(&json!(true)).unwrap_err(), "Not a valid string.");
        assert_eq!(name.to_internal_value(&Value::Null).unwrap_err(), NOT_NULL);
        assert_eq!(FieldDef::string("x").nullable().to_internal_value(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn numbers_and_booleans() {
        let n = FieldDef::integer("n").min_value(0);
        assert_eq!(n.to_internal_value(&json!("7")).unwrap(), json!(7));
        assert_eq!(n.to_internal_value(&json!(3.0)).unwrap(), json!(3));
        assert_eq!(n.to_internal_value(&json!(3.5)).unwrap_err(), "A valid integer is required.");
        assert_eq!(
            n.to_internal_value(&json!(-1)).unwrap_err(),
            "Ensure this value is greater than or equal to 0."
        );
        assert_eq!(FieldDef::float("f").to_internal_value(&json!("1.5")).unwrap(), json!(1.5));
        assert_eq!(FieldDef::boolean("b").to_internal_value(&json!("false")).unwrap(), json!(false));
        assert_eq!(FieldDef::boolean("b").to_internal_value(&json!("maybe")).unwrap_err(), "Must be a valid boolean.");
    }

    #[test]
    fn enums_default_to_first_option() {
        let status = FieldDef::enumeration("status", &["open", "closed"]);
        assert_eq!(status.default, Some(json!("open")));
        assert!(!status.required);
        assert_eq!(
            status.to_internal_value(&json!("lost")).unwrap_err(),
            "status needs to be one of ['open', 'closed']"
        );
        assert_eq!(status.to_internal_value(&json!("")).unwrap(), json!(""));
    }

    #[test]
    fn dates_and_references() {
        assert_eq!(FieldDef::date("d").to_internal_value(&json!("2024-02-29")).unwrap(), json!("2024-02-29"));
        assert!(FieldDef::date("d").to_internal_value(&json!("29/02/2024")).is_err());
        assert_eq!(
            FieldDef::datetime("at").to_internal_value(&json!("2024-02-29T10:00")).unwrap(),
            json!("2024-02-29T10:00:00.000000Z")
        );

        let owner = FieldDef::reference("owner_id", ModelDef::new("users").build());
        assert_eq!(
            owner.to_internal_value(&json!(["x"])).unwrap_err(),
            "Incorrect type. Expected pk value, received list."
        );
    }
}
