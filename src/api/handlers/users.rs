//! Account endpoints behind the ownership and role gates.

use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    api::error::Envelope,
    auth::{Account, AuthService, ServiceError},
};

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account", body = Envelope<Account>),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Not the owner and not an admin"),
        (status = 404, description = "No such account")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    auth: Extension<Arc<AuthService>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let account = auth.account(id).await?;
    Ok(Json(Envelope::data(account)))
}

#[utoipa::path(
    delete,
    path = "/users/{id}/sessions",
    params(("id" = Uuid, Path, description = "Account id")),
    responses(
        (status = 200, description = "Session revoked"),
        (status = 401, description = "Missing or invalid access token"),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "No such account")
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn revoke_sessions(
    auth: Extension<Arc<AuthService>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    auth.revoke_account(id).await?;
    Ok(Json(Envelope::success(Some("Session revoked"))))
}
