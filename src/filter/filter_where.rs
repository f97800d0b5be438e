use serde_json::Value;

use super::error::{validate_column, FilterError};
use super::types::{FilterOp, FilterWhereInfo, Scope};

/// Compiles the JSON filter language into a parameterized Postgres WHERE clause.
///
/// Placeholders are numbered from `starting_param_index + 1` so the clause can be
/// appended to statements that already bind parameters (e.g. `UPDATE ... SET`).
pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
        }
    }

    pub fn generate(
        where_data: Option<&Value>,
        starting_param_index: usize,
        scope: Scope,
    ) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);

        // Scope applies once, at the top level; nested groups only carry user conditions.
        let mut sql_conditions = vec![];
        if let Some(condition) = scope.sql_condition() {
            sql_conditions.push(condition.to_string());
        }
        if let Some(where_data) = where_data {
            if let Some(sql) = filter_where.build_clause(where_data)? {
                sql_conditions.push(sql);
            }
        }

        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, filter_where.param_values))
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        if where_data.is_null() { return Ok(()); }
        match where_data {
            Value::Object(_) => Self::new(0).build_clause(where_data).map(|_| ()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn build_clause(&mut self, where_data: &Value) -> Result<Option<String>, FilterError> {
        let obj = match where_data {
            Value::Null => return Ok(None),
            Value::Object(obj) => obj,
            _ => return Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        };

        let mut parts = vec![];
        for (key, value) in obj {
            if key.starts_with('$') {
                parts.push(self.build_logical(key, value)?);
            } else {
                validate_column(key)?;
                for condition in Self::parse_field_condition(key, value)? {
                    parts.push(self.build_sql_condition(&condition)?);
                }
            }
        }

        if parts.is_empty() { Ok(None) } else { Ok(Some(parts.join(" AND "))) }
    }

    fn build_logical(&mut self, op: &str, value: &Value) -> Result<String, FilterError> {
        match op {
            "$and" | "$or" => {
                let arr = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData(format!("{} requires array", op)))?;
                if arr.is_empty() {
                    return Ok(if op == "$and" { "1=1" } else { "1=0" }.to_string());
                }
                let mut sql_parts = Vec::new();
                for v in arr {
                    let sql = self.build_clause(v)?.unwrap_or_else(|| "1=1".to_string());
                    sql_parts.push(format!("({})", sql));
                }
                let joiner = if op == "$and" { " AND " } else { " OR " };
                Ok(format!("({})", sql_parts.join(joiner)))
            }
            "$not" => {
                let sql = self.build_clause(value)?.unwrap_or_else(|| "1=1".to_string());
                Ok(format!("NOT ({})", sql))
            }
            _ => Err(FilterError::UnsupportedOperator(op.to_string())),
        }
    }

    /// `{field: {"$op": data, ...}}` or the implicit-equality form `{field: data}`.
    pub(crate) fn parse_field_condition(field: &str, value: &Value) -> Result<Vec<FilterWhereInfo>, FilterError> {
        if let Value::Object(obj) = value {
            let mut conditions = vec![];
            for (op_key, op_val) in obj {
                let operator = FilterOp::parse(op_key).ok_or_else(|| FilterError::UnsupportedOperator(op_key.clone()))?;
                conditions.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
            }
            Ok(conditions)
        } else {
            Ok(vec![FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() }])
        }
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", condition.column);
        let data = &condition.data;
        match condition.operator {
            FilterOp::Eq => {
                if data.is_null() { Ok(format!("{} IS NULL", quoted_column)) }
                else { Ok(format!("{} = {}", quoted_column, self.param(data.clone()))) }
            }
            FilterOp::Ne => {
                if data.is_null() { Ok(format!("{} IS NOT NULL", quoted_column)) }
                else { Ok(format!("{} IS DISTINCT FROM {}", quoted_column, self.param(data.clone()))) }
            }
            FilterOp::Gt => Ok(format!("{} > {}", quoted_column, self.param(data.clone()))),
            FilterOp::Gte => Ok(format!("{} >= {}", quoted_column, self.param(data.clone()))),
            FilterOp::Lt => Ok(format!("{} < {}", quoted_column, self.param(data.clone()))),
            FilterOp::Lte => Ok(format!("{} <= {}", quoted_column, self.param(data.clone()))),
            FilterOp::Like => Ok(format!("{} LIKE {}", quoted_column, self.param(data.clone()))),
            FilterOp::NLike => Ok(format!("{} NOT LIKE {}", quoted_column, self.param(data.clone()))),
            FilterOp::ILike => Ok(format!("{} ILIKE {}", quoted_column, self.param(data.clone()))),
            FilterOp::NILike => Ok(format!("{} NOT ILIKE {}", quoted_column, self.param(data.clone()))),
            FilterOp::In | FilterOp::NIn => {
                let negate = condition.operator == FilterOp::NIn;
                let values = match data {
                    Value::Array(values) => values.clone(),
                    other => vec![other.clone()],
                };
                if values.is_empty() {
                    return Ok(if negate { "1=1" } else { "1=0" }.to_string());
                }
                let params: Vec<String> = values.into_iter().map(|v| self.param(v)).collect();
                let keyword = if negate { "NOT IN" } else { "IN" };
                Ok(format!("{} {} ({})", quoted_column, keyword, params.join(", ")))
            }
            FilterOp::Between => {
                if let Value::Array(values) = data {
                    if values.len() != 2 { return Err(FilterError::InvalidOperatorData("$between requires exactly 2 values".to_string())); }
                    Ok(format!("{} BETWEEN {} AND {}", quoted_column, self.param(values[0].clone()), self.param(values[1].clone())))
                } else { Err(FilterError::InvalidOperatorData("$between requires array with 2 values".to_string())) }
            }
            FilterOp::Null => match data {
                Value::Bool(true) => Ok(format!("{} IS NULL", quoted_column)),
                Value::Bool(false) => Ok(format!("{} IS NOT NULL", quoted_column)),
                _ => Err(FilterError::InvalidOperatorData("$null requires a boolean".to_string())),
            },
            FilterOp::Any => {
                if let Value::Array(values) = data {
                    if values.is_empty() { return Ok("1=0".to_string()); }
                    let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                    Ok(format!("{} && ARRAY[{}]", quoted_column, params.join(", ")))
                } else {
                    Ok(format!("{} && ARRAY[{}]", quoted_column, self.param(data.clone())))
                }
            }
            FilterOp::All => {
                if let Value::Array(values) = data {
                    if values.is_empty() { return Ok("1=1".to_string()); }
                    let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
                    Ok(format!("{} @> ARRAY[{}]", quoted_column, params.join(", ")))
                } else {
                    Ok(format!("{} @> ARRAY[{}]", quoted_column, self.param(data.clone())))
                }
            }
            FilterOp::Size => Ok(format!("COALESCE(array_length({}, 1), 0) = {}", quoted_column, self.param(data.clone()))),
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}
