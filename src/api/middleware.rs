//! Request gates: session guard, role gate and ownership gate.
//!
//! Applied with `route_layer` so they only run for matched routes. The guard
//! must be the outermost of the three.

use axum::{
    extract::{Extension, Path, Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{
    authorize_owner, authorize_roles, error::AUTHENTICATION_REQUIRED, AuthService, Identity,
    Role, ServiceError,
};

pub(crate) const ADMIN_ONLY: &[Role] = &[Role::Admin];

/// Verify the bearer access token and attach the caller [`Identity`].
pub async fn session_guard(
    auth: Extension<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer_token(request.headers()) else {
        return ServiceError::Auth(AUTHENTICATION_REQUIRED).into_response();
    };
    match auth.verify_access(&token) {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Admit only callers whose role is in the state slice.
pub async fn role_gate(
    State(allowed): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Response {
    match authorize_roles(request.extensions().get::<Identity>(), allowed) {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Admit admins, or callers whose id equals the `{id}` path segment.
pub async fn ownership_gate(path: Option<Path<Uuid>>, request: Request, next: Next) -> Response {
    // Not a UUID: no such resource.
    let Some(Path(resource_id)) = path else {
        return ServiceError::NotFound.into_response();
    };
    match authorize_owner(request.extensions().get::<Identity>(), resource_id) {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
