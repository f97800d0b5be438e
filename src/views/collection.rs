use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use super::context::RequestContext;
use super::hooks::{DefaultHooks, ViewHooks};
use super::pagination::{self, PaginationType, DEFAULT_CURSOR_ORDERING};
use super::permissions::{filter_queryset, Action};
use super::{authorize, finish, scoped_queryset};
use crate::database::{Database, ModelDef, QuerySet, Row, Transaction};
use crate::error::{ApiError, ErrorTree};
use crate::export::{self, LinkedOrder};
use crate::filter::FilterOrderInfo;
use crate::middleware::{ApiResponse, ApiResult};
use crate::serializer::{self, ModelSerializer};

/// GET (list/export), POST (create) and PUT (bulk create) on a model.
pub struct CollectionView {
    model: Arc<ModelDef>,
    list_serializer: Option<Arc<dyn ModelSerializer>>,
    create_serializer: Option<Arc<dyn ModelSerializer>>,
    detail_serializer: Option<Arc<dyn ModelSerializer>>,
    bulk_serializer: Option<Arc<dyn ModelSerializer>>,
    bulk_detail_serializer: Option<Arc<dyn ModelSerializer>>,
    pagination: PaginationType,
    default_ordering: String,
    allow_disable_pagination: bool,
    hooks: Arc<dyn ViewHooks>,
}

impl CollectionView {
    pub fn new(model: Arc<ModelDef>) -> Self {
        Self {
            model,
            list_serializer: None,
            create_serializer: None,
            detail_serializer: None,
            bulk_serializer: None,
            bulk_detail_serializer: None,
            pagination: PaginationType::Cursor,
            default_ordering: DEFAULT_CURSOR_ORDERING.to_string(),
            allow_disable_pagination: false,
            hooks: Arc::new(DefaultHooks),
        }
    }

    pub fn list_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.list_serializer = Some(serializer);
        self
    }

    pub fn create_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.create_serializer = Some(serializer);
        self
    }

    pub fn detail_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.detail_serializer = Some(serializer);
        self
    }

    pub fn bulk_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.bulk_serializer = Some(serializer);
        self
    }

    /// Read shape for bulk results; falls back to the detail serializer.
    pub fn bulk_detail_serializer(mut self, serializer: Arc<dyn ModelSerializer>) -> Self {
        self.bulk_detail_serializer = Some(serializer);
        self
    }

    /// Mode used when the request does not ask for one.
    pub fn pagination(mut self, pagination: PaginationType) -> Self {
        self.pagination = pagination;
        self
    }

    /// Cursor key when `order_by` is absent, e.g. `"order"` for ordered children.
    pub fn default_ordering(mut self, field: impl Into<String>) -> Self {
        self.default_ordering = field.into();
        self
    }

    pub fn allow_disable_pagination(mut self, allow: bool) -> Self {
        self.allow_disable_pagination = allow;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ViewHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn model(&self) -> &Arc<ModelDef> {
        &self.model
    }

    pub async fn list(&self, db: &dyn Database, ctx: &RequestContext) -> ApiResult {
        let permissions = authorize(self.hooks.as_ref(), &self.model, ctx, Action::Get)?;

        let queryset = scoped_queryset(&self.model, &ctx.query);
        let queryset = filter_queryset(queryset, Action::Get, permissions.as_ref(), ctx.principal.as_ref(), &self.model);
        let queryset = self.hooks.add_filters(queryset, ctx);

        let serializer = self
            .list_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("List serializer is not defined"))?;

        let mut tx = db.begin().await?;
        let result = self.paginated_response(tx.as_mut(), ctx, queryset, serializer.as_ref()).await;
        finish(tx, result).await
    }

    pub async fn create(&self, db: &dyn Database, ctx: &RequestContext, data: Value) -> ApiResult {
        authorize(self.hooks.as_ref(), &self.model, ctx, Action::Post)?;
        let create = self
            .create_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("Create serializer is not defined"))?;

        let mut tx = db.begin().await?;
        let result = self.create_one(tx.as_mut(), ctx, create.as_ref(), data).await;
        finish(tx, result).await
    }

    pub async fn bulk_create(&self, db: &dyn Database, ctx: &RequestContext, data: Value) -> ApiResult {
        authorize(self.hooks.as_ref(), &self.model, ctx, Action::Put)?;
        let bulk = self
            .bulk_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("Bulk serializer is not defined"))?;

        let mut tx = db.begin().await?;
        let result = self.create_many(tx.as_mut(), ctx, bulk.as_ref(), data).await;
        finish(tx, result).await
    }

    async fn create_one(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        create: &dyn ModelSerializer,
        data: Value,
    ) -> ApiResult {
        let data = self.hooks.override_post_data(ctx, data);
        let validated = serializer::validate(create, tx, &data, false).await?;
        let instance = serializer::create(create, tx, validated).await?;
        debug!("Created {} via {}", self.model.table, create.name());

        let detail = self
            .detail_serializer
            .as_ref()
            .ok_or_else(|| ApiError::misconfigured("Detail serializer is not defined"))?;
        let data = serializer::to_representation(detail.as_ref(), tx, &instance).await?;
        Ok(self.hooks.post_response(ctx, data))
    }

    /// Validates every item before persisting any, so errors come back as one
    /// list aligned with the submitted array.
    async fn create_many(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        bulk: &dyn ModelSerializer,
        data: Value,
    ) -> ApiResult {
        let items = match self.hooks.override_put_data(ctx, data) {
            Value::Array(items) => items,
            other => {
                return Err(ErrorTree::field(
                    "non_field_errors",
                    format!(
                        "Expected a list of items but got type \"{}\".",
                        serializer::fields::type_name(&other)
                    ),
                )
                .into())
            }
        };

        let mut validated = Vec::with_capacity(items.len());
        let mut errors = Vec::with_capacity(items.len());
        let mut failed = false;
        for item in &items {
            match serializer::validate(bulk, tx, item, false).await {
                Ok(row) => {
                    validated.push(row);
                    errors.push(ErrorTree::Fields(Default::default()));
                }
                Err(ApiError::Validation(tree)) => {
                    failed = true;
                    errors.push(tree);
                }
                Err(other) => return Err(other),
            }
        }
        if failed {
            return Err(ErrorTree::List(errors).into());
        }

        let mut created: Vec<Row> = Vec::with_capacity(validated.len());
        for row in validated {
            created.push(serializer::create(bulk, tx, row).await?);
        }
        debug!("Bulk created {} {}", created.len(), self.model.table);

        let detail = self
            .bulk_detail_serializer
            .as_ref()
            .or(self.detail_serializer.as_ref())
            .ok_or_else(|| ApiError::misconfigured("Bulk detail serializer is not defined"))?;
        let data = serializer::to_representation_many(detail.as_ref(), tx, &created).await?;
        Ok(self.hooks.post_response(ctx, Value::Array(data)))
    }

    /// Export, explicit ordering, unpaginated list, or one page, in that order.
    async fn paginated_response(
        &self,
        tx: &mut dyn Transaction,
        ctx: &RequestContext,
        queryset: QuerySet,
        serializer: &dyn ModelSerializer,
    ) -> ApiResult {
        if ctx.query.get("export").map_or(false, |v| !v.is_empty()) {
            return export::export_queryset(tx, queryset, &ctx.query).await;
        }

        let linked = match ctx.query.get("order_by").filter(|f| !f.is_empty()) {
            Some(field) => self.check_order_by(field)?,
            None => None,
        };
        let ordering = pagination::ordering(&ctx.query, &self.default_ordering);

        if self.allow_disable_pagination && ctx.query.get_bool("paginated", None) == Some(false) {
            let rows = match &linked {
                Some(linked) => linked.load(tx, queryset).await?,
                None => queryset.order_by_info(ordering).all(tx).await?,
            };
            let data = serializer::to_representation_many(serializer, tx, &rows).await?;
            return Ok(ApiResponse::ok(Value::Array(data)));
        }

        let kind = PaginationType::from_query(&ctx.query, self.pagination);
        let page = pagination::paginate(tx, queryset, ctx, kind, ordering, linked.as_ref()).await?;
        let results = serializer::to_representation_many(serializer, tx, &page.rows).await?;
        Ok(ApiResponse::ok(page.into_json(results)))
    }

    /// A plain column must exist on the model. A `link__column` path must follow
    /// declared links to a column and comes back as a `LinkedOrder`.
    fn check_order_by(&self, field: &str) -> Result<Option<LinkedOrder>, ApiError> {
        let info = FilterOrderInfo::from_field(field);
        let invalid = || ApiError::bad_request(format!("This field: '{}' is not valid", field));
        if info.column.contains("__") {
            return LinkedOrder::parse(&self.model, field).map(Some).ok_or_else(invalid);
        }
        if self.model.has_column(&info.column) {
            Ok(None)
        } else {
            Err(invalid())
        }
    }
}
