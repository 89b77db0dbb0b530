//! Logout, refresh rotation and the refresh cookie.
//!
//! The refresh token only ever travels in an `HttpOnly; SameSite=Strict` cookie.
//! Access tokens travel in response bodies and `Authorization` headers.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, CACHE_CONTROL, COOKIE, PRAGMA, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use super::types::AccessTokenData;
use crate::{
    api::error::Envelope,
    auth::{AuthConfig, AuthService, Identity, ServiceError},
};

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
const REFRESH_TOKEN_NOT_FOUND: &str = "Refresh token not found";

#[utoipa::path(
    post,
    path = "/logout",
    responses(
        (status = 200, description = "Session revoked and refresh cookie cleared"),
        (status = 401, description = "Missing or invalid access token")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    auth: Extension<Arc<AuthService>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ServiceError> {
    let token = extract_refresh_token(&headers);
    auth.logout(&identity, token.as_deref()).await?;

    // Always clear the cookie, even if there was nothing to revoke.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(auth.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        StatusCode::OK,
        response_headers,
        Json(Envelope::success(Some("Logged out"))),
    ))
}

#[utoipa::path(
    post,
    path = "/refresh-token",
    responses(
        (status = 200, description = "New access token; refresh cookie rotated", body = Envelope<AccessTokenData>),
        (status = 401, description = "Missing, invalid, reused or expired refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh_token(auth: Extension<Arc<AuthService>>, headers: HeaderMap) -> Response {
    let mut response = match extract_refresh_token(&headers) {
        None => ServiceError::Auth(REFRESH_TOKEN_NOT_FOUND).into_response(),
        Some(token) => match auth.refresh(&token).await {
            Ok(tokens) => match refresh_cookie(auth.config(), &tokens.refresh_token) {
                Ok(cookie) => {
                    let body = AccessTokenData {
                        access_token: tokens.access_token,
                    };
                    let mut response = Json(Envelope::data(body)).into_response();
                    response.headers_mut().insert(SET_COOKIE, cookie);
                    response
                }
                Err(err) => ServiceError::Internal(err.into()).into_response(),
            },
            Err(err) => {
                // A dead refresh token is useless to the browser; drop it.
                let clear = !matches!(err, ServiceError::Internal(_));
                let mut response = err.into_response();
                if clear {
                    if let Ok(cookie) = clear_refresh_cookie(auth.config()) {
                        response.headers_mut().insert(SET_COOKIE, cookie);
                    }
                }
                response
            }
        },
    };

    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Build the `HttpOnly; SameSite=Strict` refresh cookie.
pub(super) fn refresh_cookie(
    config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = config.refresh_cookie_max_age_seconds();
    let mut cookie = format!(
        "{REFRESH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age}"
    );
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_refresh_cookie(config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{REFRESH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Strict; Max-Age=0");
    if config.cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == REFRESH_COOKIE_NAME && !val.trim().is_empty())
                .then(|| val.trim().to_string())
        })
}
