use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::instrument;

use super::{
    session::refresh_cookie,
    types::{LoginData, LoginRequest},
};
use crate::{
    api::error::Envelope,
    auth::{AuthService, ServiceError},
};

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; refresh token set as an HttpOnly cookie", body = Envelope<LoginData>),
        (status = 401, description = "Invalid email or password")
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn login(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(Json(request)) = payload else {
        return Err(ServiceError::validation("body", "Missing payload"));
    };

    let outcome = auth
        .login(&request.email, SecretString::from(request.password))
        .await?;

    let cookie = refresh_cookie(auth.config(), &outcome.tokens.refresh_token)
        .map_err(|err| ServiceError::Internal(err.into()))?;
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);

    // The access token is only ever returned in the body.
    let data = LoginData {
        user: outcome.account,
        access_token: outcome.tokens.access_token,
    };
    Ok((StatusCode::OK, headers, Json(Envelope::data(data))))
}
