use serde_json::{Map, Value};

use super::error::{is_identifier, validate_column, FilterError};
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{FilterOrderInfo, Scope, SqlResult};

/// A single-table query: JSON WHERE tree, ordering, window and soft-deletion scope.
///
/// Postgres renders it to SQL; the in-memory backend evaluates the same tree directly.
#[derive(Debug, Clone)]
pub struct Filter {
    table_name: String,
    where_data: Option<Value>,
    order_data: Vec<FilterOrderInfo>,
    limit: Option<usize>,
    offset: Option<usize>,
    scope: Scope,
    for_update: bool,
}

impl Filter {
    pub fn new(table_name: impl Into<String>) -> Result<Self, FilterError> {
        let table_name = table_name.into();
        Self::validate_table_name(&table_name)?;
        Ok(Self {
            table_name,
            where_data: None,
            order_data: vec![],
            limit: None,
            offset: None,
            scope: Scope::Alive,
            for_update: false,
        })
    }

    pub fn where_clause(&mut self, conditions: Value) -> Result<&mut Self, FilterError> {
        FilterWhere::validate(&conditions)?;
        self.where_data = if conditions.is_null() { None } else { Some(conditions) };
        Ok(self)
    }

    pub fn order(&mut self, order_spec: Value) -> Result<&mut Self, FilterError> {
        let order_info = FilterOrder::validate_and_parse(&order_spec)?;
        self.order_data = order_info;
        Ok(self)
    }

    pub fn order_by(&mut self, order_info: Vec<FilterOrderInfo>) -> Result<&mut Self, FilterError> {
        for info in &order_info {
            validate_column(&info.column)?;
        }
        self.order_data = order_info;
        Ok(self)
    }

    pub fn limit(&mut self, limit: Option<usize>, offset: Option<usize>) -> &mut Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    pub fn scope(&mut self, scope: Scope) -> &mut Self {
        self.scope = scope;
        self
    }

    /// Row-lock the matched rows until the surrounding transaction ends.
    pub fn for_update(&mut self) -> &mut Self {
        self.for_update = true;
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn where_data(&self) -> Option<&Value> {
        self.where_data.as_ref()
    }

    pub fn order_data(&self) -> &[FilterOrderInfo] {
        &self.order_data
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<usize> {
        self.offset
    }

    pub fn scope_value(&self) -> Scope {
        self.scope
    }

    pub fn to_sql(&self) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = FilterWhere::generate(self.where_data.as_ref(), 0, self.scope)?;
        let order_clause = FilterOrder::generate(&self.order_data)?;
        let limit_clause = self.build_limit_clause();

        let query = [
            "SELECT *".to_string(),
            format!("FROM \"{}\"", self.table_name),
            format!("WHERE {}", where_clause),
            order_clause,
            limit_clause,
            if self.for_update { "FOR UPDATE".to_string() } else { String::new() },
        ].into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ");

        Ok(SqlResult { query, params })
    }

    pub fn to_where_sql(&self, starting_param_index: usize) -> Result<SqlResult, FilterError> {
        let (where_clause, params) = FilterWhere::generate(self.where_data.as_ref(), starting_param_index, self.scope)?;
        Ok(SqlResult { query: where_clause, params })
    }

    pub fn to_count_sql(&self) -> Result<SqlResult, FilterError> {
        let where_result = self.to_where_sql(0)?;
        let query = format!("SELECT COUNT(*) AS count FROM \"{}\" WHERE {}", self.table_name, where_result.query);
        Ok(SqlResult { query, params: where_result.params })
    }

    /// `UPDATE ... SET` over every matched row. Null values are written as a literal
    /// `NULL` so untyped columns (uuid, timestamptz) accept them.
    pub fn to_update_sql(&self, changes: &Map<String, Value>) -> Result<SqlResult, FilterError> {
        if changes.is_empty() {
            return Err(FilterError::EmptyUpdate);
        }

        let mut params = vec![];
        let mut assignments = vec![];
        for (column, value) in changes {
            validate_column(column)?;
            if value.is_null() {
                assignments.push(format!("\"{}\" = NULL", column));
            } else {
                params.push(value.clone());
                assignments.push(format!("\"{}\" = ${}", column, params.len()));
            }
        }

        let where_result = self.to_where_sql(params.len())?;
        params.extend(where_result.params);
        let query = format!(
            "UPDATE \"{}\" SET {} WHERE {}",
            self.table_name,
            assignments.join(", "),
            where_result.query
        );
        Ok(SqlResult { query, params })
    }

    pub fn to_delete_sql(&self) -> Result<SqlResult, FilterError> {
        let where_result = self.to_where_sql(0)?;
        let query = format!("DELETE FROM \"{}\" WHERE {}", self.table_name, where_result.query);
        Ok(SqlResult { query, params: where_result.params })
    }

    fn validate_table_name(name: &str) -> Result<(), FilterError> {
        if name.is_empty() { return Err(FilterError::InvalidTableName("Table name cannot be empty".to_string())); }
        if !is_identifier(name) {
            return Err(FilterError::InvalidTableName(format!("Invalid table name format: {}", name)));
        }
        Ok(())
    }

    fn build_limit_clause(&self) -> String {
        match (self.limit, self.offset) {
            (Some(l), Some(o)) => format!("LIMIT {} OFFSET {}", l, o),
            (Some(l), None) => format!("LIMIT {}", l),
            (None, Some(o)) => format!("OFFSET {}", o),
            _ => String::new(),
        }
    }
}
