use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;

/// What a view hands back to axum: a status plus a JSON, CSV or empty body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Csv { filename: String, content: Vec<u8> },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: ResponseBody,
}

impl ApiResponse {
    /// 200 with a JSON body
    pub fn ok(data: Value) -> Self {
        Self::with_status(data, StatusCode::OK)
    }

    /// 201 with a JSON body
    pub fn created(data: Value) -> Self {
        Self::with_status(data, StatusCode::CREATED)
    }

    pub fn with_status(data: Value, status: StatusCode) -> Self {
        Self {
            status,
            body: ResponseBody::Json(data),
        }
    }

    /// 204 No Content
    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: ResponseBody::Empty,
        }
    }

    /// CSV attachment named `<filename>.csv`
    pub fn csv(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            body: ResponseBody::Csv {
                filename: filename.into(),
                content,
            },
        }
    }

    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        match self.body {
            ResponseBody::Empty => self.status.into_response(),
            ResponseBody::Json(data) => (self.status, Json(data)).into_response(),
            ResponseBody::Csv { filename, content } => {
                let disposition = format!("attachment; filename=\"{}.csv\"", filename.replace('"', ""));
                let mut response = (self.status, content).into_response();
                let headers = response.headers_mut();
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/csv"));
                match HeaderValue::from_str(&disposition) {
                    Ok(value) => {
                        headers.insert(header::CONTENT_DISPOSITION, value);
                    }
                    Err(e) => tracing::warn!("Dropping unrepresentable export filename {:?}: {}", filename, e),
                }
                response
            }
        }
    }
}

pub type ApiResult = Result<ApiResponse, crate::error::ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn csv_headers() {
        let response = ApiResponse::csv("report", b"a,b\n".to_vec()).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"report.csv\""
        );
    }

    #[test]
    fn no_content_has_no_body_type() {
        let response = ApiResponse::no_content().into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn json_accessor() {
        assert_eq!(ApiResponse::created(json!({"id": 1})).json(), Some(&json!({"id": 1})));
        assert_eq!(ApiResponse::no_content().json(), None);
    }
}
