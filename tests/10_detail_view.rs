mod common;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{Method, StatusCode},
    Router,
};
use serde_json::json;

use api_utils::database::MemoryDatabase;
use api_utils::demo;
use api_utils::views::{resource_router, AppState, CollectionView, DetailView};
use common::{project_row, seed_projects, Call, OTHER, OWNER};

#[tokio::test]
async fn retrieve_renders_fields_and_relations() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::get("/projects/p00").send(&app).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    assert_eq!(
        res.json(),
        json!({
            "id": "p00",
            "name": "Project 0",
            "status": "active",
            "owner_id": OWNER,
            "budget": null,
            "settings": null,
            "tasks": [],
        })
    );
    Ok(())
}

#[tokio::test]
async fn unknown_id_is_not_found() -> Result<()> {
    let (app, _db) = common::demo_app();

    let res = Call::get("/projects/missing").send(&app).await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.json(), json!({"detail": "An object with this id does not exist"}));
    Ok(())
}

#[tokio::test]
async fn permission_is_checked_before_lookup() -> Result<()> {
    let (app, _db) = common::demo_app();

    // No `projects` entry in the role permissions means no capabilities
    let res = Call::get("/projects/missing")
        .user(OWNER)
        .permissions("tasks:view_all")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json(), json!({"detail": "You do not have permission to access this"}));

    let res = Call::get("/projects/missing")
        .user(OWNER)
        .permissions("projects:edit_all")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn view_owned_hides_other_principals_rows() -> Result<()> {
    let (app, db) = common::demo_app();
    db.seed(
        "projects",
        vec![
            project_row("mine", "Mine", OWNER, "2024-01-01T10:00:00.000000Z"),
            project_row("theirs", "Theirs", OTHER, "2024-01-01T10:01:00.000000Z"),
        ],
    )
    .await;

    let owned = Call::get("/projects/theirs")
        .user(OWNER)
        .permissions("projects:view_owned")
        .send(&app)
        .await?;
    assert_eq!(owned.status, StatusCode::NOT_FOUND);

    let mine = Call::get("/projects/mine")
        .user(OWNER)
        .permissions("projects:view_owned")
        .send(&app)
        .await?;
    assert_eq!(mine.status, StatusCode::OK);

    let all = Call::get("/projects/theirs")
        .user(OWNER)
        .permissions("projects:view_all")
        .send(&app)
        .await?;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.json()["name"], "Theirs");
    Ok(())
}

#[tokio::test]
async fn patch_updates_only_submitted_fields() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::patch("/projects/p00", json!({"name": "Renamed", "budget": 1500}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    let body = res.json();
    assert_eq!(body["name"], "Renamed");
    assert_eq!(body["budget"], 1500);
    assert_eq!(body["status"], "active");

    let stored = db.rows("projects").await;
    assert_eq!(stored[0]["name"], json!("Renamed"));
    Ok(())
}

#[tokio::test]
async fn patch_validation_errors_are_field_keyed() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::patch("/projects/p00", json!({"status": "lost", "budget": -1}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let body = res.json();
    assert_eq!(
        body["status"],
        json!(["status needs to be one of ['draft', 'active', 'archived']"])
    );
    assert!(body["budget"].is_array(), "{}", body);

    // Nothing was written
    assert_eq!(db.rows("projects").await[0]["status"], json!("active"));
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_rejected() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::new(Method::PATCH, "/projects/p00")
        .raw("{\"name\": ")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let detail = res.json()["detail"].as_str().unwrap_or_default().to_string();
    assert!(detail.starts_with("JSON parse error - "), "{}", detail);
    Ok(())
}

#[tokio::test]
async fn delete_is_soft_and_visible_through_objects_param() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::delete("/projects/p00").send(&app).await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert!(res.bytes.is_empty());

    let stored = db.rows("projects").await;
    assert_eq!(stored.len(), 1);
    assert!(!stored[0]["deleted_at"].is_null());

    assert_eq!(Call::get("/projects/p00").send(&app).await?.status, StatusCode::NOT_FOUND);
    assert_eq!(
        Call::get("/projects/p00?objects=deleted").send(&app).await?.status,
        StatusCode::OK
    );
    assert_eq!(Call::get("/projects/p00?objects=all").send(&app).await?.status, StatusCode::OK);

    // Deleting again finds nothing alive
    assert_eq!(Call::delete("/projects/p00").send(&app).await?.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn delete_needs_delete_capability() -> Result<()> {
    let (app, db) = common::demo_app();
    seed_projects(&db, OWNER, 1).await;

    let res = Call::delete("/projects/p00")
        .user(OWNER)
        .permissions("projects:view_all,edit_all")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = Call::delete("/projects/p00")
        .user(OTHER)
        .permissions("projects:delete_owned")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = Call::delete("/projects/p00")
        .user(OWNER)
        .permissions("projects:delete_owned")
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn views_are_not_deletable_by_default() -> Result<()> {
    let db = MemoryDatabase::new();
    seed_projects(&db, OWNER, 1).await;
    let models = demo::models();

    let collection = Arc::new(CollectionView::new(models.projects.clone()));
    let detail = Arc::new(DetailView::new(models.projects.clone()));
    let app: Router = Router::new()
        .nest("/projects", resource_router(collection, detail))
        .with_state(AppState::new(Arc::new(db.clone())));

    let res = Call::delete("/projects/p00").send(&app).await?;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert!(db.rows("projects").await[0]["deleted_at"].is_null());

    // Missing serializers are wiring errors
    let res = Call::get("/projects/p00").send(&app).await?;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.json(), json!({"detail": "Detail serializer is not defined"}));
    Ok(())
}
