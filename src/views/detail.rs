use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use super::context::RequestContext;
use super::hooks::{DefaultHooks, ViewHooks};
use super::permissions::{filter_queryset, Action, PermissionSet};
use super::{authorize, finish, scoped_queryset};
use crate::database::{Database, ModelDef, Row, Transaction};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::serializer::{self, ModelSerializer};

/// GET/PATCH/DELETE on a single row addressed by id.
pub struct DetailView {
    model: Arc<ModelDef>,
    detail_serializer: Option<Arc<dyn ModelSerializer>>,
    edit_serializer: Option<Arc<dyn ModelSerializer>>,
    deletable: bool,
    partial: bool,
    hooks: Arc<dyn ViewHooks>,
}

impl DetailView {
    pub fn new(model: Arc<ModelDef>) -> Self {
        Self {
            model,
            detail_serializer: None,
            edit_serializer: None,
            deletable: false,
            partial: true,
            hooks: Arc::new(DefaultHooks),
        }
    }

    pub fn detail_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.detail_serializer = Some(serializer);
        self
    }

    pub fn edit_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.edit_serializer = Some(serializer);
        self
    }

    pub fn deletable(mut self, deletable: bool) -> Self {
        self.deletable = deletable;
        self
    }

    /// Whether PATCH skips required-field checks (default true).
    pub fn partial(mut self, partial: bool) -> Self {
        self.partial = partial;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ViewHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub async fn retrieve(&self, db: &dyn Database, ctx: &RequestContext, id: &str) -> ApiResult {
        let permissions = authorize(self.hooks.as_ref(), &self.model, ctx, Action::Get)?;
        let mut tx = db.begin().await?;
        let result = self.render_detail(tx.as_mut(), ctx, id, permissions.as_ref()).await;
        finish(tx, result).await
    }

    pub async fn partial_update(&self, db: &dyn Database, ctx: &RequestContext, id: &str, data: Value) -> ApiResult {
        let permissions = authorize(self.hooks.as_ref(), &self.model, ctx, Action::Patch)?;
        let mut tx = db.begin().await?;
        let result = self.apply_edit(tx.as_mut(), ctx, id, data, permissions.as_ref()).await;
        finish(tx, result).await
    }

    pub async fn destroy(&self, db: &dyn Database, ctx: &RequestContext, id: &str) -> ApiResult {
        if !self.deletable {
            return Err(self.hooks.permission_denied(ctx, Action::Delete));
        }
        let permissions = authorize(self.hooks.as_ref(), &self.model, ctx, Action::Delete)?;
        let mut tx = db.begin().await?;
        let result = self.remove(tx.as_mut(), ctx, id, permissions.as_ref()).await;
        finish(tx, result).await
    }

    async fn render_detail(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        id: &str,
        permissions: Option<&PermissionSet>,
    ) -> ApiResult {
        let instance = self.lookup(tx, ctx, id, Action::Get, permissions).await?;
        let detail = self.require_detail_serializer()?;
        let data = serializer::to_representation(detail.as_ref(), tx, &instance).await?;
        Ok(ApiResponse::ok(self.hooks.override_response_data(ctx, data)))
    }

    async fn apply_edit(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        id: &str,
        data: Value,
        permissions: Option<&PermissionSet>,
    ) -> ApiResult {
        let instance = self.lookup(tx, ctx, id, Action::Patch, permissions).await?;
        let edit = self
            .edit_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("Edit serializer is not defined"))?;

        let data = self.hooks.override_patch_data(ctx, data);
        let validated = serializer::validate(edit.as_ref(), tx, &data, self.partial).await?;
        let updated = serializer::update(edit.as_ref(), tx, &instance, validated).await?;
        debug!("Updated {} {}", self.model.table, id);

        let detail = self.require_detail_serializer()?;
        let data = serializer::to_representation(detail.as_ref(), tx, &updated).await?;
        Ok(ApiResponse::ok(data))
    }

    async fn remove(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        id: &str,
        permissions: Option<&PermissionSet>,
    ) -> ApiResult {
        let instance = self.lookup(tx, ctx, id, Action::Delete, permissions).await?;
        match self.hooks.handle_delete(tx, &self.model, &instance).await? {
            Some(response) => Ok(response),
            None => {
                debug!("Deleted {} {}", self.model.table, id);
                Ok(ApiResponse::no_content())
            }
        }
    }

    async fn lookup(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        id: &str,
        action: Action,
        permissions: Option<&PermissionSet>,
    ) -> Result<Row, ApiError> {
        let queryset = scoped_queryset(&self.model, &ctx.query).filter(json!({ "id": id }));
        let queryset = filter_queryset(queryset, action, permissions, ctx.principal.as_ref(), &self.model);
        let queryset = self.hooks.add_filters(queryset, ctx);

        queryset
            .first(tx)
            .await?
            .ok_or_else(|| self.hooks.instance_not_found(ctx, action))
    }

    fn require_detail_serializer(&self) -> Result<&Arc<dyn ModelSerializer>, ApiError> {
        self.detail_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("Detail serializer is not defined"))
    }
}
