mod common;

use anyhow::Result;
use axum::http::{header, StatusCode};
use serde_json::{json, Value};

use common::{project_row, row, settings_row, Call, OTHER, OWNER};

fn encode(value: &Value) -> String {
    url::form_urlencoded::byte_serialize(value.to_string().as_bytes()).collect()
}

async fn seed(db: &api_utils::database::MemoryDatabase) {
    let mut funded = project_row("p00", "Apollo", OWNER, "2024-03-05T09:00:00.000000Z");
    funded.insert("budget".to_string(), json!(1234567));
    funded.insert("settings_id".to_string(), json!("s1"));
    db.seed(
        "projects",
        vec![
            funded,
            project_row("p01", "Borealis", OTHER, "2024-03-06T09:00:00.000000Z"),
        ],
    )
    .await;
    db.seed(
        "project_settings",
        vec![row(json!({
            "id": "s1",
            "project_id": "p00",
            "visibility": "public",
            "notify": true,
            "created_at": "2024-03-05T09:00:00.000000Z",
            "updated_at": "2024-03-05T09:00:00.000000Z",
            "deleted_at": null,
        }))],
    )
    .await;
}

#[tokio::test]
async fn default_export_writes_every_model_field() -> Result<()> {
    let (app, db) = common::demo_app();
    seed(&db).await;

    let res = Call::get("/projects?export=true").send(&app).await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    assert_eq!(res.headers[header::CONTENT_TYPE], "text/csv");
    assert_eq!(res.headers[header::CONTENT_DISPOSITION], "attachment; filename=\"export.csv\"");

    let text = res.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "id,name,status,owner_id,budget,settings_id,created_at,updated_at,deleted_at"
    );
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("p00,Apollo,active,owner-1,1234567,s1,"), "{}", lines[1]);
    assert!(lines[2].starts_with("p01,Borealis,active,owner-2,,,"), "{}", lines[2]);
    Ok(())
}

#[tokio::test]
async fn custom_columns_follow_links_and_format() -> Result<()> {
    let (app, db) = common::demo_app();
    seed(&db).await;

    let options = json!({
        "columns": [
            {"name": "Name", "accessor": "name"},
            {"name": "Budget", "accessor": "budget", "type": "number"},
            {"name": "Visibility", "accessor": "settings.visibility"},
            {"name": "Created", "accessor": "created_at", "type": "date", "format": "%d/%m/%Y"},
        ],
        "select_related": ["settings"],
    });
    let res = Call::get(format!(
        "/projects?export=1&filename=report&order_by=-name&options={}",
        encode(&options)
    ))
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    assert_eq!(res.headers[header::CONTENT_DISPOSITION], "attachment; filename=\"report.csv\"");

    let text = res.text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Name,Budget,Visibility,Created",
            "Borealis,,,06/03/2024",
            "Apollo,\"1,234,567\",public,05/03/2024",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn export_orders_by_linked_column() -> Result<()> {
    let (app, db) = common::demo_app();
    seed(&db).await;
    let mut comet = project_row("p02", "Comet", OWNER, "2024-03-07T09:00:00.000000Z");
    comet.insert("settings_id".to_string(), json!("s2"));
    db.seed("projects", vec![comet]).await;
    db.seed("project_settings", vec![settings_row("s2", "p02", "private")]).await;

    let options = json!({"columns": [{"name": "Name", "accessor": "name"}]});
    let res = Call::get(format!(
        "/projects?export=1&order_by=settings__visibility&options={}",
        encode(&options)
    ))
    .send(&app)
    .await?;
    assert_eq!(res.status, StatusCode::OK, "{}", res.text());
    assert_eq!(res.text().lines().collect::<Vec<_>>(), vec!["Name", "Comet", "Apollo", "Borealis"]);

    let res = Call::get("/projects?export=1&order_by=-settings__team").send(&app).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), json!({"detail": "This field: '-settings__team' is not valid"}));
    Ok(())
}

#[tokio::test]
async fn export_applies_list_filtering() -> Result<()> {
    let (app, db) = common::demo_app();
    seed(&db).await;

    let options = json!({"columns": [{"name": "Id", "accessor": "id"}]});
    let res = Call::get(format!("/projects?export=1&options={}", encode(&options)))
        .user(OTHER)
        .permissions("projects:view_owned")
        .send(&app)
        .await?;
    assert_eq!(res.text().lines().collect::<Vec<_>>(), vec!["Id", "p01"]);
    Ok(())
}

#[tokio::test]
async fn bad_export_requests_are_client_errors() -> Result<()> {
    let (app, db) = common::demo_app();
    seed(&db).await;

    let options = json!({"columns": [{"name": "Team", "accessor": "settings.team"}]});
    let res = Call::get(format!("/projects?export=1&options={}", encode(&options)))
        .send(&app)
        .await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        res.json(),
        json!({"detail": "Unknown export accessor 'settings.team' on projects"})
    );

    let res = Call::get("/projects?export=1&options=%7Bbroken").send(&app).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    let detail = res.json()["detail"].as_str().unwrap_or_default().to_string();
    assert!(detail.starts_with("Invalid export options"), "{}", detail);

    let res = Call::get("/projects?export=1&order_by=colour").send(&app).await?;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json(), json!({"detail": "This field: 'colour' is not valid"}));
    Ok(())
}
