mod common;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::{http::StatusCode, Router};
use serde_json::{json, Value};

use api_utils::database::{MemoryDatabase, ModelDef, Row, Transaction};
use api_utils::error::ApiError;
use api_utils::serializer::{FieldDef, ModelSerializer, NestedResult, NestedResults, RelationDescriptor, Serializer};
use api_utils::views::{resource_router, AppState, CollectionView, DetailView};
use common::Call;

async fn create_project(app: &Router, body: Value) -> Result<Value> {
    let res = Call::post("/projects", body).send(app).await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.text());
    Ok(res.json())
}

fn task_ids(project: &Value) -> Vec<String> {
    common::ids_of(&project["tasks"])
}

#[tokio::test]
async fn create_persists_one_to_one_and_ordered_children() -> Result<()> {
    let (app, db) = common::demo_app();

    let project = create_project(
        &app,
        json!({
            "name": "Roadmap",
            "settings": {"visibility": "team"},
            "tasks": [{"title": "Draft"}, {"title": "Review", "done": true}],
        }),
    )
    .await?;

    let settings_id = project["settings"]["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(
        project["settings"],
        json!({"id": settings_id, "visibility": "team", "notify": false})
    );
    let tasks = project["tasks"].as_array().cloned().unwrap_or_default();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["title"], "Draft");
    assert_eq!(tasks[0]["order"], 0);
    assert_eq!(tasks[0]["done"], false);
    assert_eq!(tasks[1]["title"], "Review");
    assert_eq!(tasks[1]["order"], 1);
    assert_eq!(tasks[1]["done"], true);

    let projects = db.rows("projects").await;
    assert_eq!(projects[0]["settings_id"], json!(settings_id));
    let settings = db.rows("project_settings").await;
    assert_eq!(settings[0]["project_id"], project["id"]);
    for task in db.rows("tasks").await {
        assert_eq!(task["project_id"], project["id"]);
    }
    Ok(())
}

#[tokio::test]
async fn nested_validation_errors_line_up_with_items() -> Result<()> {
    let (app, db) = common::demo_app();

    let res = Call::post(
        "/projects",
        json!({"name": "Roadmap", "tasks": [{"title": "ok"}, {"done": "maybe"}]}),
    )
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"tasks": [{}, {"title": ["This field is required."], "done": ["Must be a valid boolean."]}]})
    );

    let res = Call::post("/projects", json!({"name": "Roadmap", "tasks": {"title": "x"}}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"tasks": ["Expected a list of items but got type \"dict\"."]})
    );

    assert!(db.rows("projects").await.is_empty());
    assert!(db.rows("tasks").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn patch_syncs_children_in_submitted_order() -> Result<()> {
    let (app, db) = common::demo_app();
    let project = create_project(
        &app,
        json!({"name": "Roadmap", "tasks": [{"title": "A"}, {"title": "B"}, {"title": "C"}]}),
    )
    .await?;
    let id = project["id"].as_str().unwrap_or_default().to_string();
    let ids = task_ids(&project);

    let res = Call::patch(
        format!("/projects/{}", id),
        json!({"tasks": [{"id": ids[2], "title": "C!"}, {"title": "D"}, {"id": ids[0]}]}),
    )
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    let body = res.json();
    let tasks = body["tasks"].as_array().cloned().unwrap_or_default();
    let titles: Vec<&str> = tasks.iter().filter_map(|t| t["title"].as_str()).collect();
    assert_eq!(titles, vec!["C!", "D", "A"]);
    let orders: Vec<i64> = tasks.iter().filter_map(|t| t["order"].as_i64()).collect();
    assert_eq!(orders, vec![0, 1, 2]);
    assert_eq!(tasks[0]["id"], json!(ids[2]));
    assert_eq!(tasks[2]["id"], json!(ids[0]));

    // B was dropped from the list and is removed outright
    let stored = db.rows("tasks").await;
    assert_eq!(stored.len(), 3);
    assert!(stored.iter().all(|t| t["id"] != json!(ids[1])));
    Ok(())
}

#[tokio::test]
async fn patch_without_children_leaves_them_alone() -> Result<()> {
    let (app, db) = common::demo_app();
    let project = create_project(&app, json!({"name": "Roadmap", "tasks": [{"title": "A"}]})).await?;
    let id = project["id"].as_str().unwrap_or_default().to_string();

    let res = Call::patch(format!("/projects/{}", id), json!({"name": "Renamed"}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(task_ids(&res.json()), task_ids(&project));

    let res = Call::patch(format!("/projects/{}", id), json!({"tasks": []}))
        .send(&app)
        .await?;
    assert_eq!(res.json()["tasks"], json!([]));
    assert!(db.rows("tasks").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn foreign_children_are_rejected_and_rolled_back() -> Result<()> {
    let (app, db) = common::demo_app();
    let mine = create_project(&app, json!({"name": "Mine", "tasks": [{"title": "A"}, {"title": "B"}]})).await?;
    let theirs = create_project(&app, json!({"name": "Theirs", "tasks": [{"title": "X"}]})).await?;
    let foreign = task_ids(&theirs)[0].clone();

    let res = Call::patch(
        format!("/projects/{}", mine["id"].as_str().unwrap_or_default()),
        json!({"name": "Changed", "tasks": [{"id": foreign}]}),
    )
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"tasks": "One or more tasks does not belong to this project"})
    );

    // Neither the rename nor the removal of A and B survived
    assert_eq!(db.rows("tasks").await.len(), 3);
    let names: Vec<Value> = db.rows("projects").await.iter().map(|p| p["name"].clone()).collect();
    assert_eq!(names, vec![json!("Mine"), json!("Theirs")]);
    Ok(())
}

#[tokio::test]
async fn one_to_one_updates_in_place_clears_and_guards_identity() -> Result<()> {
    let (app, db) = common::demo_app();
    let project = create_project(&app, json!({"name": "Roadmap", "settings": {"visibility": "team"}})).await?;
    let uri = format!("/projects/{}", project["id"].as_str().unwrap_or_default());
    let settings_id = project["settings"]["id"].clone();

    let res = Call::patch(&uri, json!({"settings": {"visibility": "public", "notify": true}}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    assert_eq!(
        res.json()["settings"],
        json!({"id": settings_id, "visibility": "public", "notify": true})
    );
    assert_eq!(db.rows("project_settings").await.len(), 1);

    let res = Call::patch(&uri, json!({"settings": {"id": "someone-else", "visibility": "team"}}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), json!({"settings": "This settings does not belong to this object"}));

    let res = Call::patch(&uri, json!({"settings": null})).send(&app).await?;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.json()["settings"].is_null());
    assert!(db.rows("projects").await[0]["settings_id"].is_null());
    // The row itself is kept
    assert_eq!(db.rows("project_settings").await.len(), 1);

    // A fresh payload after clearing creates a new row
    let res = Call::patch(&uri, json!({"settings": {"visibility": "private"}})).send(&app).await?;
    assert_ne!(res.json()["settings"]["id"], settings_id);
    assert_eq!(db.rows("project_settings").await.len(), 2);
    Ok(())
}

/// A customer whose address is written first so its id can be stored on the customer.
struct CustomerSerializer {
    inner: Serializer,
    audit: Arc<ModelDef>,
}

#[async_trait]
impl ModelSerializer for CustomerSerializer {
    fn name(&self) -> &str {
        "CustomerSerializer"
    }

    fn model(&self) -> &Arc<ModelDef> {
        self.inner.model()
    }

    fn fields(&self) -> &[FieldDef] {
        self.inner.fields()
    }

    fn relations(&self) -> &[RelationDescriptor] {
        self.inner.relations()
    }

    async fn post_create(&self, tx: &mut dyn Transaction, row: &Row, nested: &NestedResults) -> Result<(), ApiError> {
        if row.get("name") == Some(&json!("reject")) {
            return Err(ApiError::bad_request("Customer rejected"));
        }
        assert!(matches!(nested.get("address"), None | Some(NestedResult::One(_))));
        let mut entry = Row::new();
        entry.insert("customer_id".to_string(), row["id"].clone());
        self.audit.objects().create(tx, entry).await?;
        Ok(())
    }
}

fn customer_app() -> (Router, MemoryDatabase) {
    let addresses = ModelDef::new("addresses").columns(["street"]).build();
    let audit = ModelDef::new("audit_log").columns(["customer_id"]).build();
    let customers = ModelDef::new("customers")
        .columns(["name"])
        .link("address", "address_id", addresses.clone())
        .build();

    let address: Arc<dyn ModelSerializer> = Serializer::new("AddressSerializer", addresses)
        .field(FieldDef::string("street"))
        .build();
    let serializer: Arc<dyn ModelSerializer> = Arc::new(CustomerSerializer {
        inner: Serializer::new("CustomerSerializer", customers.clone())
            .field(FieldDef::string("name"))
            .relation(RelationDescriptor::one("address", "address_id", address).create_before_model()),
        audit,
    });

    let collection = CollectionView::new(customers.clone())
        .list_serializer(serializer.clone())
        .create_serializer(serializer.clone())
        .detail_serializer(serializer.clone());
    let detail = DetailView::new(customers)
        .detail_serializer(serializer.clone())
        .edit_serializer(serializer);

    let db = MemoryDatabase::new();
    let app = Router::new()
        .nest("/customers", resource_router(Arc::new(collection), Arc::new(detail)))
        .with_state(AppState::new(Arc::new(db.clone())));
    (app, db)
}

#[tokio::test]
async fn create_before_model_writes_child_first() -> Result<()> {
    let (app, db) = customer_app();

    let res = Call::post("/customers", json!({"name": "Ann", "address": {"street": "Main St"}}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::CREATED, "{}", res.text());
    let body = res.json();
    assert_eq!(body["address"]["street"], "Main St");

    let address_id = body["address"]["id"].clone();
    assert_eq!(db.rows("customers").await[0]["address_id"], address_id);
    assert_eq!(db.rows("audit_log").await[0]["customer_id"], body["id"]);
    Ok(())
}

#[tokio::test]
async fn missing_required_relation_fails_create() -> Result<()> {
    let (app, db) = customer_app();

    let res = Call::post("/customers", json!({"name": "Ann"})).send(&app).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), json!({"address": ["was not resolvable 'create'"]}));
    assert!(db.rows("customers").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn post_create_failure_rolls_back_everything() -> Result<()> {
    let (app, db) = customer_app();

    let res = Call::post("/customers", json!({"name": "reject", "address": {"street": "Main St"}}))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), json!({"detail": "Customer rejected"}));
    assert!(db.rows("customers").await.is_empty());
    assert!(db.rows("addresses").await.is_empty());
    assert!(db.rows("audit_log").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn create_before_model_is_not_editable() -> Result<()> {
    let (app, _db) = customer_app();
    let created = Call::post("/customers", json!({"name": "Ann", "address": {"street": "Main St"}}))
        .send(&app)
        .await?
        .json();

    let res = Call::patch(
        format!("/customers/{}", created["id"].as_str().unwrap_or_default()),
        json!({"name": "Anne"}),
    )
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"address": ["'create_before_model' not supported on Edit"]})
    );
    Ok(())
}
