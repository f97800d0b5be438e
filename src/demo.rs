//! Sample `projects` resource served by the demo binary: a project owns an
//! optional settings row (one-to-one) and an ordered list of tasks.

use axum::{
    extract::State, http::StatusCode, middleware::from_fn, response::IntoResponse, routing::get, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::config;
use crate::database::{Database, ModelDef};
use crate::middleware::identity_headers_middleware;
use crate::serializer::{FieldDef, ModelSerializer, RelationDescriptor, Serializer, SerializerKind};
use crate::views::{resource_router, AppState, CollectionView, DetailView, RequestContext, ViewHooks};

pub const PROJECT_STATUSES: [&str; 3] = ["draft", "active", "archived"];
pub const VISIBILITIES: [&str; 3] = ["private", "team", "public"];

pub struct Models {
    pub projects: Arc<ModelDef>,
    pub settings: Arc<ModelDef>,
    pub tasks: Arc<ModelDef>,
}

pub fn models() -> Models {
    let settings = ModelDef::new("project_settings")
        .columns(["project_id", "visibility", "notify"])
        .build();
    let tasks = ModelDef::new("tasks")
        .columns(["project_id", "title", "done", "order"])
        .build();
    let projects = ModelDef::new("projects")
        .columns(["name", "status", "owner_id", "budget"])
        .permission_key("projects")
        .owned_by("owner_id")
        .link("settings", "settings_id", settings.clone())
        .build();
    Models { projects, settings, tasks }
}

/// Stamps the caller as owner of new projects.
struct ProjectHooks;

impl ViewHooks for ProjectHooks {
    fn override_post_data(&self, ctx: &RequestContext, mut data: Value) -> Value {
        if let (Some(owner), Some(object)) = (ctx.principal_id(), data.as_object_mut()) {
            object.insert("owner_id".to_string(), json!(owner));
        }
        data
    }
}

pub fn project_views(models: &Models) -> (Arc<CollectionView>, Arc<DetailView>) {
    let settings: Arc<dyn ModelSerializer> = Serializer::new("ProjectSettingsSerializer", models.settings.clone())
        .field(FieldDef::enumeration("visibility", &VISIBILITIES))
        .field(FieldDef::boolean("notify").default(json!(false)))
        .build();
    let task: Arc<dyn ModelSerializer> = Serializer::new("TaskSerializer", models.tasks.clone())
        .field(FieldDef::string("title").max_length(200))
        .field(FieldDef::boolean("done").default(json!(false)))
        .field(FieldDef::integer("order").read_only())
        .build();

    let project_fields = || {
        vec![
            FieldDef::string("name").max_length(120),
            FieldDef::enumeration("status", &PROJECT_STATUSES),
            FieldDef::string("owner_id").optional(),
            FieldDef::integer("budget").min_value(0).nullable(),
        ]
    };

    let detail: Arc<dyn ModelSerializer> = Serializer::new("ProjectSerializer", models.projects.clone())
        .with_fields(project_fields())
        .relation(
            RelationDescriptor::one("settings", "settings_id", settings)
                .parent_field("project_id")
                .allow_null(),
        )
        .relation(RelationDescriptor::many("tasks", "project_id", task).allow_null())
        .build();
    let list: Arc<dyn ModelSerializer> = Serializer::new("ProjectListSerializer", models.projects.clone())
        .of_kind(SerializerKind::List)
        .with_fields(project_fields())
        .build();

    let hooks = Arc::new(ProjectHooks);
    let collection = CollectionView::new(models.projects.clone())
        .list_serializer(list)
        .create_serializer(detail.clone())
        .detail_serializer(detail.clone())
        .bulk_serializer(detail.clone())
        .allow_disable_pagination(true)
        .hooks(hooks.clone());
    let detail_view = DetailView::new(models.projects.clone())
        .detail_serializer(detail.clone())
        .edit_serializer(detail)
        .deletable(true)
        .hooks(hooks);

    (Arc::new(collection), Arc::new(detail_view))
}

/// The demo sits behind a gateway that sets the identity headers, so it trusts them.
pub fn app(db: Arc<dyn Database>) -> Router {
    let (collection, detail) = project_views(&models());

    let router = Router::new()
        .route("/health", get(health))
        .nest("/projects", resource_router(collection, detail))
        .layer(from_fn(identity_headers_middleware))
        .layer(CorsLayer::permissive());
    let router = if config().api.enable_request_logging {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    };
    router.with_state(AppState::new(db))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "timestamp": now }))),
        Err(e) => {
            tracing::error!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "timestamp": now })),
            )
        }
    }
}
