//! Response envelope and the single place where [`ServiceError`] becomes HTTP.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use utoipa::ToSchema;

use crate::auth::{FieldError, ServiceError};

/// Challenge sent with 401 when the access token is well formed but stale.
/// Clients use it to decide that a refresh is worth attempting.
pub const EXPIRED_TOKEN_CHALLENGE: &str =
    r#"Bearer error="invalid_token", error_description="token expired""#;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// `{status, data?, message?, errors?}`
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Envelope<T> {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            status: Status::Success,
            data: Some(data),
            message: None,
            errors: None,
        }
    }
}

impl Envelope<()> {
    pub fn success(message: Option<&str>) -> Self {
        Self {
            status: Status::Success,
            data: None,
            message: message.map(str::to_string),
            errors: None,
        }
    }

    pub fn error(message: &str, errors: Option<Vec<FieldError>>) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(message.to_string()),
            errors,
        }
    }
}

impl ServiceError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(_) | Self::TokenExpired | Self::TokenInvalid | Self::SessionExpired => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.to_string();
        match self {
            Self::Validation(errors) => {
                (status, Json(Envelope::error(&message, Some(errors)))).into_response()
            }
            Self::TokenExpired => {
                let mut response = (status, Json(Envelope::error(&message, None))).into_response();
                response.headers_mut().insert(
                    WWW_AUTHENTICATE,
                    HeaderValue::from_static(EXPIRED_TOKEN_CHALLENGE),
                );
                response
            }
            Self::Internal(err) => {
                error!("Internal error: {err:#}");
                (status, Json(Envelope::error(&message, None))).into_response()
            }
            _ => (status, Json(Envelope::error(&message, None))).into_response(),
        }
    }
}
