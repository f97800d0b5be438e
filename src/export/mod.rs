//! CSV export of a query set, plus the value formatters and daily-series
//! gap filling used by reporting endpoints.

pub mod accessor;
pub mod series;

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::config;
use crate::database::{DatabaseError, Link, QuerySet, Transaction};
use crate::dates::{self, DateError};
use crate::error::ApiError;
use crate::filter::FilterOrderInfo;
use crate::middleware::{ApiResponse, ApiResult};
use crate::params::body::is_truthy;
use crate::params::QueryParams;

pub use accessor::{compile_hint, Accessor, LinkedOrder, RelatedRows};
pub use series::{verify_list, DailyCount};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unknown export accessor '{accessor}' on {model}")]
    UnknownAccessor { accessor: String, model: String },

    #[error("Invalid export options: {0}")]
    InvalidOptions(String),

    #[error("This field: '{0}' is not valid")]
    InvalidOrdering(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<ExportError> for ApiError {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::UnknownAccessor { .. }
            | ExportError::InvalidOptions(_)
            | ExportError::InvalidOrdering(_) => ApiError::bad_request(err.to_string()),
            ExportError::Database(e) => e.into(),
            ExportError::Csv(e) => {
                tracing::error!("CSV export failed: {}", e);
                ApiError::internal_server_error("Export failed")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Date,
    Number,
}

/// One output column of a custom export.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportColumn {
    pub name: String,
    pub accessor: String,
    #[serde(rename = "type", default)]
    pub kind: Option<ColumnType>,
    #[serde(default)]
    pub format: Option<String>,
}

/// The `options` query parameter, a JSON document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub columns: Vec<ExportColumn>,
    #[serde(default)]
    pub select_related: Vec<String>,
    #[serde(default)]
    pub prefetch_related: Vec<String>,
}

impl ExportOptions {
    pub fn from_query(query: &QueryParams) -> Result<Self, ExportError> {
        match query.get("options").map(str::trim).filter(|raw| !raw.is_empty() && *raw != "null") {
            Some(raw) => serde_json::from_str(raw).map_err(|e| ExportError::InvalidOptions(e.to_string())),
            None => Ok(Self::default()),
        }
    }
}

/// Renders `queryset` as a CSV attachment driven by the `filename`, `options`
/// and `order_by` query parameters.
pub async fn export_queryset(tx: &mut dyn Transaction, queryset: QuerySet, query: &QueryParams) -> ApiResult {
    let filename = query
        .get("filename")
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| config().api.default_export_filename.clone());
    let options = ExportOptions::from_query(query)?;
    let content = render_csv(tx, queryset, &options, query.get("order_by")).await?;
    Ok(ApiResponse::csv(filename, content))
}

/// One header row, then one row per matched entity.
pub async fn render_csv(
    tx: &mut dyn Transaction,
    queryset: QuerySet,
    options: &ExportOptions,
    order_by: Option<&str>,
) -> Result<Vec<u8>, ExportError> {
    let model = queryset.model().clone();

    let mut queryset = queryset;
    let mut linked = None;
    if let Some(field) = order_by.filter(|f| !f.is_empty()) {
        let info = FilterOrderInfo::from_field(field);
        if info.column.contains("__") {
            let order = LinkedOrder::parse(&model, field).ok_or_else(|| ExportError::InvalidOrdering(field.to_string()))?;
            linked = Some(order);
        } else if model.has_column(&info.column) {
            queryset = queryset.order_by_info(vec![info]);
        } else {
            return Err(ExportError::InvalidOrdering(field.to_string()));
        }
    } else if queryset.ordering().is_empty() {
        queryset = queryset.order_by(["id"]);
    }

    let columns: Vec<(String, Accessor, Option<(ColumnType, Option<String>)>)> = if options.columns.is_empty() {
        model
            .field_names()
            .into_iter()
            .map(|name| Accessor::compile(&model, &name).map(|a| (name, a, None)))
            .collect::<Result<_, _>>()?
    } else {
        options
            .columns
            .iter()
            .map(|c| {
                Accessor::compile(&model, &c.accessor)
                    .map(|a| (c.name.clone(), a, c.kind.map(|k| (k, c.format.clone()))))
            })
            .collect::<Result<_, _>>()?
    };

    let mut paths: Vec<Vec<Link>> = Vec::new();
    for hint in options.select_related.iter().chain(&options.prefetch_related) {
        paths.push(compile_hint(&model, hint)?);
    }
    paths.extend(columns.iter().map(|(_, a, _)| a.links().to_vec()).filter(|l| !l.is_empty()));

    let rows = match &linked {
        Some(linked) => linked.load(tx, queryset).await?,
        None => queryset.all(tx).await?,
    };
    let mut related = RelatedRows::new();
    for links in &paths {
        related.prefetch(tx, &rows, links).await?;
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns.iter().map(|(name, _, _)| name.as_str()))?;
    for row in &rows {
        let mut record = Vec::with_capacity(columns.len());
        for (_, accessor, typed) in &columns {
            let value = accessor.resolve(row, &related);
            record.push(render_value(&value, typed.as_ref()));
        }
        writer.write_record(&record)?;
    }
    debug!("Exported {} {} rows", rows.len(), model.table);

    writer
        .into_inner()
        .map_err(|e| ExportError::Csv(csv::Error::from(e.into_error())))
}

/// Typed columns only format truthy values; anything unformattable is written as-is.
/// Date columns without a format use `dates.datetime_format`.
fn render_value(value: &Value, typed: Option<&(ColumnType, Option<String>)>) -> String {
    if is_truthy(value) {
        let formatted = match typed {
            Some((ColumnType::Number, _)) => format_number(value),
            Some((ColumnType::Date, format)) => {
                let format = format.as_deref().unwrap_or(&config().dates.datetime_format);
                value.as_str().and_then(|raw| format_date(raw, format).ok())
            }
            None => None,
        };
        if let Some(formatted) = formatted {
            return formatted;
        }
    }
    plain(value)
}

fn plain(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Re-renders a stored date or datetime with a strftime pattern.
pub fn format_date(value: &str, format: &str) -> Result<String, DateError> {
    if let Ok(date) = NaiveDate::parse_from_str(value.trim(), dates::DEFAULT_INPUT_FORMAT) {
        return dates::format_date(date, format);
    }
    dates::format(&dates::parse(value)?, format)
}

/// Groups the integer part in thousands: `1234567.5` becomes `"1,234,567.5"`.
/// Non-numeric values yield `None`.
pub fn format_number(value: &Value) -> Option<String> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.trim().parse::<f64>().is_ok() => s.trim().to_string(),
        _ => return None,
    };

    let (sign, unsigned) = match text.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", text.as_str()),
    };
    let (int_part, fraction) = match unsigned.split_once('.') {
        Some((int_part, fraction)) => (int_part, Some(fraction)),
        None => (unsigned, None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    Some(match fraction {
        Some(fraction) => format!("{}{}.{}", sign, grouped, fraction),
        None => format!("{}{}", sign, grouped),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_get_thousands_separators() {
        assert_eq!(format_number(&json!(1234567)).as_deref(), Some("1,234,567"));
        assert_eq!(format_number(&json!(-1234.5)).as_deref(), Some("-1,234.5"));
        assert_eq!(format_number(&json!(999)).as_deref(), Some("999"));
        assert_eq!(format_number(&json!("1000")).as_deref(), Some("1,000"));
        assert_eq!(format_number(&json!("abc")), None);
    }

    #[test]
    fn dates_use_strftime() {
        assert_eq!(format_date("2024-03-05", "%d/%m/%Y").unwrap(), "05/03/2024");
        assert_eq!(
            format_date("2024-03-05T10:30:00.000000Z", "%Y-%m-%d %H:%M").unwrap(),
            "2024-03-05 10:30"
        );
        assert!(format_date("soon", "%Y").is_err());
    }

    #[test]
    fn falsy_values_skip_formatting() {
        let number = (ColumnType::Number, None);
        assert_eq!(render_value(&json!(0), Some(&number)), "0");
        assert_eq!(render_value(&Value::Null, Some(&number)), "");
        assert_eq!(render_value(&json!(12000), Some(&number)), "12,000");

        let date = (ColumnType::Date, None);
        assert_eq!(render_value(&json!("2024-03-05"), Some(&date)), "2024-03-05");
        assert_eq!(
            render_value(&json!("2024-03-05T10:30:00.000000Z"), Some(&date)),
            "05/03/2024, 10:30 UTC"
        );
        let dated = (ColumnType::Date, Some("%d %b %Y".to_string()));
        assert_eq!(render_value(&json!("2024-03-05"), Some(&dated)), "05 Mar 2024");
        assert_eq!(render_value(&json!("not a date"), Some(&dated)), "not a date");
        assert_eq!(render_value(&json!(true), None), "true");
        assert_eq!(render_value(&json!({"a": 1}), None), "{\"a\":1}");
    }

    #[test]
    fn options_parse_from_query() {
        let query = QueryParams::parse(Some(
            "options=%7B%22columns%22%3A%5B%7B%22name%22%3A%22Name%22%2C%22accessor%22%3A%22name%22%2C%22type%22%3A%22number%22%7D%5D%7D",
        ));
        let options = ExportOptions::from_query(&query).unwrap();
        assert_eq!(options.columns.len(), 1);
        assert_eq!(options.columns[0].kind, Some(ColumnType::Number));

        let bad = QueryParams::parse(Some("options=%7Bnope"));
        assert!(matches!(ExportOptions::from_query(&bad), Err(ExportError::InvalidOptions(_))));
        assert!(ExportOptions::from_query(&QueryParams::parse(None)).unwrap().columns.is_empty());
    }
}
