//! Trusted-proxy identity: reads the principal from `x-user-id` and
//! `x-user-permissions` and stores it as a request extension.
//!
//! Install this only behind a gateway that sets those headers itself. Without
//! it, views never look at the headers and requests are anonymous unless an
//! auth layer inserts a `Principal`.

use axum::{extract::Request, http::HeaderMap, middleware::Next, response::Response};

use crate::views::{Principal, RolePermissions};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_PERMISSIONS_HEADER: &str = "x-user-permissions";

/// An auth layer that ran earlier keeps its principal.
pub async fn identity_headers_middleware(mut request: Request, next: Next) -> Response {
    if request.extensions().get::<Principal>().is_none() {
        if let Some(principal) = principal_from_headers(request.headers()) {
            tracing::debug!("Principal {} taken from identity headers", principal.id);
            request.extensions_mut().insert(principal);
        }
    }
    next.run(request).await
}

pub fn principal_from_headers(headers: &HeaderMap) -> Option<Principal> {
    let id = extract_header_value(headers, USER_ID_HEADER)?;
    let permissions = extract_header_value(headers, USER_PERMISSIONS_HEADER).map(|raw| RolePermissions::parse(&raw));
    Some(Principal { id, permissions })
}

fn extract_header_value(headers: &HeaderMap, header_name: &str) -> Option<String> {
    headers
        .get(header_name)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
