//! Generic REST endpoints: a detail view (GET/PATCH/DELETE by id) and a
//! collection view (GET list, POST create, PUT bulk create), mounted together by
//! `resource_router`.

pub mod collection;
pub mod context;
pub mod detail;
pub mod hooks;
pub mod pagination;
pub mod permissions;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::config;
use crate::database::{Database, ModelDef, QuerySet, Transaction};
use crate::error::ApiError;
use crate::filter::Scope;
use crate::middleware::ApiResult;
use crate::params::QueryParams;

pub use collection::CollectionView;
pub use context::{Principal, RequestContext};
pub use detail::DetailView;
pub use hooks::{DefaultHooks, ViewHooks};
pub use pagination::PaginationType;
pub use permissions::{Action, Capability, PermissionSet, RolePermissions};

/// Shared router state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

/// `objects=all` shows every row, `objects=deleted` only soft-deleted ones;
/// anything else shows alive rows.
pub fn scoped_queryset(model: &Arc<ModelDef>, query: &QueryParams) -> QuerySet {
    match query.get("objects") {
        Some("all") => model.scoped(Scope::All),
        Some("deleted") => model.scoped(Scope::Dead),
        _ => model.scoped(Scope::Alive),
    }
}

/// Endpoint hook first, then role permissions. Runs before any data access.
pub(crate) fn authorize(
    hooks: &dyn ViewHooks,
    model: &ModelDef,
    ctx: &RequestContext,
    action: Action,
) -> Result<Option<PermissionSet>, ApiError> {
    let permissions = permissions::role_permission(ctx.principal.as_ref(), model);
    if !hooks.has_permission(ctx, action) || !permissions::has_role_permission(action, permissions.as_ref()) {
        debug!("{:?} on {} denied for {:?}", action, model.table, ctx.principal_id());
        return Err(hooks.permission_denied(ctx, action));
    }
    Ok(permissions)
}

/// Commits on success and rolls back on error, keeping the original error.
pub(crate) async fn finish(tx: Box<dyn Transaction>, result: ApiResult) -> ApiResult {
    match result {
        Ok(response) => {
            tx.commit().await?;
            Ok(response)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!("Rollback failed after '{}': {}", err, rollback);
            }
            Err(err)
        }
    }
}

/// An empty body reads as `{}`.
pub(crate) fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(json!({}));
    }
    serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("JSON parse error - {}", e)))
}

/// Mounts `collection` at `/` and `detail` at `/:id`.
pub fn resource_router(collection: Arc<CollectionView>, detail: Arc<DetailView>) -> Router<AppState> {
    let (list_view, create_view, bulk_view) = (collection.clone(), collection.clone(), collection);
    let (get_view, patch_view, delete_view) = (detail.clone(), detail.clone(), detail);

    Router::new()
        .route(
            "/",
            get(move |State(state): State<AppState>, ctx: RequestContext| {
                let view = list_view.clone();
                async move { view.list(state.db.as_ref(), &ctx).await }
            })
            .post(move |State(state): State<AppState>, ctx: RequestContext, body: Bytes| {
                let view = create_view.clone();
                async move {
                    let data = parse_body(&body)?;
                    view.create(state.db.as_ref(), &ctx, data).await
                }
            })
            .put(move |State(state): State<AppState>, ctx: RequestContext, body: Bytes| {
                let view = bulk_view.clone();
                async move {
                    let data = parse_body(&body)?;
                    view.bulk_create(state.db.as_ref(), &ctx, data).await
                }
            }),
        )
        .route(
            "/:id",
            get(
                move |State(state): State<AppState>, Path(id): Path<String>, ctx: RequestContext| {
                    let view = get_view.clone();
                    async move { view.retrieve(state.db.as_ref(), &ctx, &id).await }
                },
            )
            .patch(
                move |State(state): State<AppState>, Path(id): Path<String>, ctx: RequestContext, body: Bytes| {
                    let view = patch_view.clone();
                    async move {
                        let data = parse_body(&body)?;
                        view.partial_update(state.db.as_ref(), &ctx, &id, data).await
                    }
                },
            )
            .delete(
                move |State(state): State<AppState>, Path(id): Path<String>, ctx: RequestContext| {
                    let view = delete_view.clone();
                    async move { view.destroy(state.db.as_ref(), &ctx, &id).await }
                },
            ),
        )
        .layer(DefaultBodyLimit::max(config().api.max_request_size_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_from_objects_param() {
        let model = ModelDef::new("projects").build();
        let alive = scoped_queryset(&model, &QueryParams::parse(None));
        assert_eq!(alive.scope(), Scope::Alive);

        let all = scoped_queryset(&model, &QueryParams::parse(Some("objects=all")));
        assert_eq!(all.scope(), Scope::All);
        assert_eq!(all.to_filter().unwrap().where_data(), None);

        let deleted = scoped_queryset(&model, &QueryParams::parse(Some("objects=deleted")));
        assert_eq!(deleted.scope(), Scope::Dead);
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), json!({}));
        assert_eq!(parse_body(&Bytes::from_static(b"[1]")).unwrap(), json!([1]));
        let err = parse_body(&Bytes::from_static(b"{oops")).unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert!(err.message().starts_with("JSON parse error"));
    }
}
