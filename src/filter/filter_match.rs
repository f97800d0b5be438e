use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::error::{validate_column, FilterError};
use super::filter_where::FilterWhere;
use super::types::{FilterOp, FilterOrderInfo, FilterWhereInfo, Scope, SortDirection};

/// Evaluates a filter tree against one row with SQL semantics: comparisons
/// against NULL are false, and `$eq: null` means IS NULL.
pub fn matches(where_data: Option<&Value>, scope: Scope, row: &Map<String, Value>) -> Result<bool, FilterError> {
    if !scope.admits(row.get("deleted_at")) {
        return Ok(false);
    }
    match where_data {
        Some(where_data) => eval_clause(where_data, row),
        None => Ok(true),
    }
}

fn eval_clause(where_data: &Value, row: &Map<String, Value>) -> Result<bool, FilterError> {
    let obj = match where_data {
        Value::Null => return Ok(true),
        Value::Object(obj) => obj,
        _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
    };

    for (key, value) in obj {
        let ok = if key.starts_with('$') {
            eval_logical(key, value, row)?
        } else {
            validate_column(key)?;
            let mut all = true;
            for condition in FilterWhere::parse_field_condition(key, value)? {
                if !eval_condition(&condition, row)? {
                    all = false;
                    break;
                }
            }
            all
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_logical(op: &str, value: &Value, row: &Map<String, Value>) -> Result<bool, FilterError> {
    match op {
        "$and" | "$or" => {
            let arr = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
            if op == "$and" {
                for v in arr {
                    if !eval_clause(v, row)? { return Ok(false); }
                }
                Ok(true)
            } else {
                for v in arr {
                    if eval_clause(v, row)? { return Ok(true); }
                }
                Ok(false)
            }
        }
        "$not" => Ok(!eval_clause(value, row)?),
        _ => Err(FilterError::UnsupportedOperator(op.to_string())),
    }
}

fn eval_condition(condition: &FilterWhereInfo, row: &Map<String, Value>) -> Result<bool, FilterError> {
    let actual = row.get(&condition.column).unwrap_or(&Value::Null);
    let data = &condition.data;

    let ordered = |accept: fn(Ordering) -> bool| -> bool {
        !actual.is_null() && !data.is_null() && accept(compare_values(actual, data))
    };

    Ok(match condition.operator {
        FilterOp::Eq => {
            if data.is_null() { actual.is_null() } else { ordered(|o| o == Ordering::Equal) }
        }
        FilterOp::Ne => {
            if data.is_null() { !actual.is_null() }
            else { actual.is_null() || compare_values(actual, data) != Ordering::Equal }
        }
        FilterOp::Gt => ordered(|o| o == Ordering::Greater),
        FilterOp::Gte => ordered(|o| o != Ordering::Less),
        FilterOp::Lt => ordered(|o| o == Ordering::Less),
        FilterOp::Lte => ordered(|o| o != Ordering::Greater),
        FilterOp::Like | FilterOp::NLike | FilterOp::ILike | FilterOp::NILike => {
            let pattern = data.as_str().ok_or_else(|| FilterError::InvalidOperatorData("LIKE requires a string pattern".to_string()))?;
            let text = match actual {
                Value::Null => return Ok(false),
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let insensitive = matches!(condition.operator, FilterOp::ILike | FilterOp::NILike);
            let hit = if insensitive {
                like(&pattern.to_lowercase(), &text.to_lowercase())
            } else {
                like(pattern, &text)
            };
            if matches!(condition.operator, FilterOp::NLike | FilterOp::NILike) { !hit } else { hit }
        }
        FilterOp::In | FilterOp::NIn => {
            let values = match data {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
            let found = !actual.is_null()
                && values.iter().any(|v| !v.is_null() && compare_values(actual, v) == Ordering::Equal);
            if condition.operator == FilterOp::In { found } else { values.is_empty() || (!actual.is_null() && !found) }
        }
        FilterOp::Between => {
            let bounds = data.as_array().filter(|b| b.len() == 2).ok_or_else(|| {
                FilterError::InvalidOperatorData("$between requires exactly 2 values".to_string())
            })?;
            !actual.is_null()
                && compare_values(actual, &bounds[0]) != Ordering::Less
                && compare_values(actual, &bounds[1]) != Ordering::Greater
        }
        FilterOp::Null => match data {
            Value::Bool(true) => actual.is_null(),
            Value::Bool(false) => !actual.is_null(),
            _ => return Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
        },
        FilterOp::Any | FilterOp::All => {
            let wanted = match data {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
            let have = match actual.as_array() {
                Some(have) => have,
                None => return Ok(false),
            };
            let contains = |v: &Value| have.iter().any(|h| compare_values(h, v) == Ordering::Equal);
            if condition.operator == FilterOp::Any {
                wanted.iter().any(contains)
            } else {
                wanted.iter().all(contains)
            }
        }
        FilterOp::Size => {
            let expected = data.as_u64().ok_or_else(|| FilterError::InvalidOperatorData("$size requires a number".to_string()))?;
            actual.as_array().map(|a| a.len() as u64).unwrap_or(0) == expected
        }
    })
}

/// Total order over JSON scalars. NULL sorts after everything, like Postgres' default
/// `NULLS LAST` for ascending order.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => match (parse_timestamp(x), parse_timestamp(y)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x.cmp(y),
        },
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    if s.len() < 20 {
        return None;
    }
    DateTime::parse_from_rfc3339(s).ok()
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) => 3,
        Value::Object(_) => 4,
        Value::Null => 5,
    }
}

pub fn sort_rows(rows: &mut [Map<String, Value>], order: &[FilterOrderInfo]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for info in order {
            let left = a.get(&info.column).unwrap_or(&Value::Null);
            let right = b.get(&info.column).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            let ordering = match info.sort {
                SortDirection::Asc => ordering,
                // Postgres: DESC puts NULLs first
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// SQL LIKE: `%` matches any run, `_` one character.
fn like(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '%' {
        pi += 1;
    }
    pi == p.len()
}
