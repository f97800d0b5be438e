#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use api_utils::database::{MemoryDatabase, Row};

pub const OWNER: &str = "owner-1";
pub const OTHER: &str = "owner-2";

/// The demo app over a fresh in-memory store.
pub fn demo_app() -> (Router, MemoryDatabase) {
    let db = MemoryDatabase::new();
    let app = api_utils::demo::app(Arc::new(db.clone()));
    (app, db)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub bytes: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.bytes).unwrap_or(Value::Null)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Builder for one request against the app.
pub struct Call {
    method: Method,
    uri: String,
    user: Option<String>,
    permissions: Option<String>,
    body: Option<Vec<u8>>,
}

impl Call {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            user: None,
            permissions: None,
            body: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, uri).json(body)
    }

    pub fn put(uri: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, uri).json(body)
    }

    pub fn patch(uri: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, uri).json(body)
    }

    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::DELETE, uri)
    }

    pub fn user(mut self, id: &str) -> Self {
        self.user = Some(id.to_string());
        self
    }

    pub fn permissions(mut self, header: &str) -> Self {
        self.permissions = Some(header.to_string());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body.to_string().into_bytes());
        self
    }

    pub fn raw(mut self, body: &str) -> Self {
        self.body = Some(body.as_bytes().to_vec());
        self
    }

    pub async fn send(self, app: &Router) -> Result<TestResponse> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(user) = &self.user {
            builder = builder.header("x-user-id", user);
        }
        if let Some(permissions) = &self.permissions {
            builder = builder.header("x-user-permissions", permissions);
        }
        let body = match self.body {
            Some(body) => {
                builder = builder.header("content-type", "application/json");
                Body::from(body)
            }
            None => Body::empty(),
        };

        let response = app.clone().oneshot(builder.body(body)?).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?.to_vec();
        Ok(TestResponse { status, headers, bytes })
    }
}

pub fn row(value: Value) -> Row {
    value.as_object().cloned().unwrap_or_default()
}

/// A stored project with a fixed id and creation time.
pub fn project_row(id: &str, name: &str, owner: &str, created_at: &str) -> Row {
    row(json!({
        "id": id,
        "name": name,
        "status": "active",
        "owner_id": owner,
        "budget": null,
        "settings_id": null,
        "created_at": created_at,
        "updated_at": created_at,
        "deleted_at": null,
    }))
}

pub fn settings_row(id: &str, project_id: &str, visibility: &str) -> Row {
    row(json!({
        "id": id,
        "project_id": project_id,
        "visibility": visibility,
        "notify": false,
        "created_at": "2024-01-01T09:00:00.000000Z",
        "updated_at": "2024-01-01T09:00:00.000000Z",
        "deleted_at": null,
    }))
}

/// Seeds `count` projects owned by `owner`, one minute apart, ids `p00`, `p01`, ...
pub async fn seed_projects(db: &MemoryDatabase, owner: &str, count: usize) -> Vec<String> {
    let mut ids = Vec::with_capacity(count);
    let mut rows = Vec::with_capacity(count);
    for i in 0..count {
        let id = format!("p{:02}", i);
        let created_at = format!("2024-01-01T10:{:02}:00.000000Z", i);
        rows.push(project_row(&id, &format!("Project {}", i), owner, &created_at));
        ids.push(id);
    }
    db.seed("projects", rows).await;
    ids
}

pub fn ids_of(results: &Value) -> Vec<String> {
    results
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item["id"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
