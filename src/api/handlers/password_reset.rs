//! Forgot/reset password endpoints.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::instrument;

use super::{
    session::clear_refresh_cookie,
    types::{ForgotPasswordRequest, ResetPasswordRequest},
};
use crate::{
    api::error::Envelope,
    auth::{AuthService, ServiceError},
};

/// Same body whether or not the account exists.
pub const RESET_REQUESTED: &str =
    "If a matching account was found, a password reset email was sent.";

#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset requested (always, to avoid account probing)"),
        (status = 400, description = "Missing email")
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn forgot_password(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(Json(request)) = payload else {
        return Err(ServiceError::validation("body", "Missing payload"));
    };
    auth.generate_reset_token(&request.email).await?;
    Ok((StatusCode::OK, Json(Envelope::success(Some(RESET_REQUESTED)))))
}

#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated; existing session revoked"),
        (status = 400, description = "Password does not meet policy"),
        (status = 401, description = "Invalid or expired reset token")
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn reset_password(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(Json(request)) = payload else {
        return Err(ServiceError::validation("body", "Missing payload"));
    };
    auth.reset_password(&request.token, SecretString::from(request.password))
        .await?;

    let mut headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(auth.config()) {
        headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        headers,
        Json(Envelope::success(Some("Password has been reset"))),
    ))
}
