//! Page-number and cursor pagination over a query set.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::context::RequestContext;
use crate::config::config;
use crate::database::{QuerySet, Row, Transaction};
use crate::error::ApiError;
use crate::export::LinkedOrder;
use crate::filter::{FilterOrderInfo, SortDirection};
use crate::params::QueryParams;

pub const DEFAULT_CURSOR_ORDERING: &str = "-created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationType {
    Page,
    Cursor,
}

impl PaginationType {
    /// `pagination_type=page` selects page numbers; anything else falls back to `default`.
    pub fn from_query(query: &QueryParams, default: PaginationType) -> Self {
        match query.get("pagination_type") {
            Some("page") => PaginationType::Page,
            Some("cursor") => PaginationType::Cursor,
            _ => default,
        }
    }
}

/// `page_size` clamped to the configured bounds; absent or non-numeric uses the default.
pub fn page_size(query: &QueryParams) -> usize {
    let settings = &config().pagination;
    match query.get_int("page_size", None) {
        Some(size) if size < settings.min_page_size as i64 => settings.min_page_size,
        Some(size) if size > settings.max_page_size as i64 => settings.max_page_size,
        Some(size) => size as usize,
        None => settings.default_page_size,
    }
}

/// The database ordering: a single non-nested `order_by` field, else the
/// default key, always followed by `id` so positions are unique. Linked keys
/// are applied separately through `LinkedOrder`.
pub fn ordering(query: &QueryParams, default: &str) -> Vec<FilterOrderInfo> {
    let primary = match query.get("order_by") {
        Some(field) if !field.is_empty() && !field.contains("__") => FilterOrderInfo::from_field(field),
        _ => FilterOrderInfo::from_field(default),
    };
    with_tiebreak(primary)
}

fn with_tiebreak(primary: FilterOrderInfo) -> Vec<FilterOrderInfo> {
    if primary.column == "id" {
        return vec![primary];
    }
    let id = FilterOrderInfo {
        column: "id".to_string(),
        sort: primary.sort,
    };
    vec![primary, id]
}

/// One page of raw rows plus the envelope fields around them.
#[derive(Debug)]
pub struct Page {
    pub rows: Vec<Row>,
    pub count: Option<i64>,
    pub next: Option<String>,
    pub previous: Option<String>,
}

impl Page {
    /// Wraps rendered results in the mode's response shape.
    pub fn into_json(self, results: Vec<Value>) -> Value {
        match self.count {
            Some(count) => json!({
                "count": count,
                "next": self.next,
                "previous": self.previous,
                "results": results,
            }),
            None => json!({
                "next": self.next,
                "previous": self.previous,
                "results": results,
            }),
        }
    }
}

/// Cursor positions need a column on the model itself, so the cursor mode
/// ignores `linked` and walks `ordering`.
pub async fn paginate(
    tx: &mut dyn Transaction,
    queryset: QuerySet,
    ctx: &RequestContext,
    kind: PaginationType,
    ordering: Vec<FilterOrderInfo>,
    linked: Option<&LinkedOrder>,
) -> Result<Page, ApiError> {
    let size = page_size(&ctx.query);
    match kind {
        PaginationType::Page => paginate_pages(tx, queryset, ctx, ordering, linked, size).await,
        PaginationType::Cursor => paginate_cursor(tx, queryset, ctx, ordering, size).await,
    }
}

async fn paginate_pages(
    tx: &mut dyn Transaction,
    queryset: QuerySet,
    ctx: &RequestContext,
    ordering: Vec<FilterOrderInfo>,
    linked: Option<&LinkedOrder>,
    size: usize,
) -> Result<Page, ApiError> {
    let invalid = || ApiError::not_found("Invalid page.");

    let number = match ctx.query.get("page") {
        None => 1,
        Some(raw) => raw.trim().parse::<usize>().map_err(|_| invalid())?,
    };
    if number == 0 {
        return Err(invalid());
    }

    let count = queryset.count(tx).await?;
    let pages = ((count.max(0) as usize) + size - 1) / size;
    if number > pages.max(1) {
        return Err(invalid());
    }

    let offset = (number - 1) * size;
    let rows: Vec<Row> = match linked {
        Some(linked) => linked
            .load(tx, queryset)
            .await?
            .into_iter()
            .skip(offset)
            .take(size)
            .collect(),
        None => {
            queryset
                .order_by_info(ordering)
                .offset(offset)
                .limit(size)
                .all(tx)
                .await?
        }
    };

    let next = (number < pages).then(|| link(ctx, "page", Some((number + 1).to_string())));
    let previous = match number {
        1 => None,
        2 => Some(link(ctx, "page", None)),
        n => Some(link(ctx, "page", Some((n - 1).to_string()))),
    };

    Ok(Page {
        rows,
        count: Some(count),
        next,
        previous,
    })
}

/// Opaque cursor: the ordering column's value and id of a boundary row, and
/// whether the page runs backwards from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cursor {
    #[serde(rename = "p")]
    position: Value,
    #[serde(rename = "i")]
    id: Value,
    #[serde(rename = "r", default)]
    reverse: bool,
}

impl Cursor {
    fn at(row: &Row, column: &str, reverse: bool) -> Self {
        Self {
            position: row.get(column).cloned().unwrap_or(Value::Null),
            id: row.get("id").cloned().unwrap_or(Value::Null),
            reverse,
        }
    }

    fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    fn decode(token: &str) -> Option<Self> {
        let bytes = URL_SAFE_NO_PAD.decode(token.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Rows strictly after this position when walking `ordering` in `direction`.
    fn keyset(&self, column: &str, direction: SortDirection) -> Value {
        let op = match direction {
            SortDirection::Asc => "$gt",
            SortDirection::Desc => "$lt",
        };
        let past_id = condition("id", Some(op), self.id.clone());
        if column == "id" {
            return past_id;
        }
        json!({
            "$or": [
                condition(column, Some(op), self.position.clone()),
                { "$and": [condition(column, None, self.position.clone()), past_id] }
            ]
        })
    }
}

async fn paginate_cursor(
    tx: &mut dyn Transaction,
    queryset: QuerySet,
    ctx: &RequestContext,
    ordering: Vec<FilterOrderInfo>,
    size: usize,
) -> Result<Page, ApiError> {
    let cursor = match ctx.query.get("cursor") {
        Some(token) => Some(Cursor::decode(token).ok_or_else(|| ApiError::not_found("Invalid cursor"))?),
        None => None,
    };

    let column = ordering
        .first()
        .map(|o| o.column.clone())
        .unwrap_or_else(|| "id".to_string());
    let direction = ordering.first().map(|o| o.sort).unwrap_or(SortDirection::Asc);

    let reverse = cursor.as_ref().map_or(false, |c| c.reverse);
    let walk = if reverse { direction.reverse() } else { direction };
    let walk_ordering: Vec<FilterOrderInfo> = ordering
        .iter()
        .map(|o| FilterOrderInfo {
            column: o.column.clone(),
            sort: if reverse { o.sort.reverse() } else { o.sort },
        })
        .collect();

    let mut scoped = queryset;
    if let Some(cursor) = &cursor {
        scoped = scoped.filter(cursor.keyset(&column, walk));
    }

    let mut rows = scoped.order_by_info(walk_ordering).limit(size + 1).all(tx).await?;
    let has_more = rows.len() > size;
    rows.truncate(size);
    if reverse {
        rows.reverse();
    }

    let (next, previous) = if reverse {
        let next = rows.last().map(|row| Cursor::at(row, &column, false));
        let previous = if has_more {
            rows.first().map(|row| Cursor::at(row, &column, true))
        } else {
            None
        };
        (next, previous)
    } else {
        let next = if has_more {
            rows.last().map(|row| Cursor::at(row, &column, false))
        } else {
            None
        };
        let previous = if cursor.is_some() {
            rows.first().map(|row| Cursor::at(row, &column, true))
        } else {
            None
        };
        (next, previous)
    };

    Ok(Page {
        rows,
        count: None,
        next: next.map(|c| link(ctx, "cursor", Some(c.encode()))),
        previous: previous.map(|c| link(ctx, "cursor", Some(c.encode()))),
    })
}

/// `{column: value}` or `{column: {op: value}}`
fn condition(column: &str, op: Option<&str>, value: Value) -> Value {
    let value = match op {
        Some(op) => {
            let mut inner = serde_json::Map::new();
            inner.insert(op.to_string(), value);
            Value::Object(inner)
        }
        None => value,
    };
    let mut map = serde_json::Map::new();
    map.insert(column.to_string(), value);
    Value::Object(map)
}

/// Request path plus query, with `key` replaced (or removed when `value` is `None`).
fn link(ctx: &RequestContext, key: &str, value: Option<String>) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in ctx.query.pairs().iter().filter(|(k, _)| k != key) {
        serializer.append_pair(k, v);
    }
    if let Some(value) = &value {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();
    if query.is_empty() {
        ctx.path.clone()
    } else {
        format!("{}?{}", ctx.path, query)
    }
}
