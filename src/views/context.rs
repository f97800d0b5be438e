use axum::{
    async_trait,
    extract::{FromRequestParts, OriginalUri},
    http::request::Parts,
};
use std::convert::Infallible;

use super::permissions::RolePermissions;
use crate::params::QueryParams;

/// The authenticated caller. `permissions: None` means role checks do not apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: String,
    pub permissions: Option<RolePermissions>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            permissions: None,
        }
    }

    pub fn with_permissions(mut self, permissions: RolePermissions) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Everything a view needs from the request besides the body.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub query: QueryParams,
    pub path: String,
}

impl RequestContext {
    pub fn principal_id(&self) -> Option<&str> {
        self.principal.as_ref().map(|p| p.id.as_str())
    }
}

/// The principal comes only from request extensions, put there by an auth layer
/// or by `identity_headers_middleware`. Requests without one are anonymous.
#[async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts.extensions.get::<Principal>().cloned();

        // Nested routers strip their prefix; links need the full path.
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|original| original.0.clone())
            .unwrap_or_else(|| parts.uri.clone());

        Ok(RequestContext {
            principal,
            query: QueryParams::parse(uri.query()),
            path: uri.path().to_string(),
        })
    }
}
