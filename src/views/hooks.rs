use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::context::RequestContext;
use super::permissions::Action;
use crate::database::{row_id, ModelDef, QuerySet, Row, Transaction};
use crate::error::ApiError;
use crate::middleware::ApiResponse;

/// Per-endpoint customisation. Every method has a default, so an endpoint only
/// overrides what it needs.
#[async_trait]
pub trait ViewHooks: Send + Sync {
    /// Endpoint-level check, evaluated before role permissions.
    fn has_permission(&self, _ctx: &RequestContext, _action: Action) -> bool {
        true
    }

    /// Extra narrowing applied after ownership filtering.
    fn add_filters(&self, queryset: QuerySet, _ctx: &RequestContext) -> QuerySet {
        queryset
    }

    fn override_patch_data(&self, _ctx: &RequestContext, data: Value) -> Value {
        data
    }

    fn override_post_data(&self, _ctx: &RequestContext, data: Value) -> Value {
        data
    }

    fn override_put_data(&self, _ctx: &RequestContext, data: Value) -> Value {
        data
    }

    /// Applied to the detail GET representation.
    fn override_response_data(&self, _ctx: &RequestContext, data: Value) -> Value {
        data
    }

    /// Runs inside the DELETE transaction. Returning a response replaces the 204.
    async fn handle_delete(
        &self,
        tx: &mut dyn Transaction,
        model: &Arc<ModelDef>,
        instance: &Row,
    ) -> Result<Option<ApiResponse>, ApiError> {
        if let Some(id) = row_id(instance) {
            model.all_objects().delete_instance(tx, id).await?;
        }
        Ok(None)
    }

    /// Response for successful POST and bulk PUT.
    fn post_response(&self, _ctx: &RequestContext, data: Value) -> ApiResponse {
        ApiResponse::created(data)
    }

    fn permission_denied(&self, _ctx: &RequestContext, _action: Action) -> ApiError {
        ApiError::forbidden("You do not have permission to access this")
    }

    fn instance_not_found(&self, _ctx: &RequestContext, _action: Action) -> ApiError {
        ApiError::not_found("An object with this id does not exist")
    }
}

/// Hooks with every default left in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ViewHooks for DefaultHooks {}
