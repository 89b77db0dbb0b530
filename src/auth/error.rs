//! Failure taxonomy for the auth core.
//!
//! Every operation in [`super::AuthService`] normalizes its failures into a
//! [`ServiceError`] before returning. Mapping to HTTP status codes happens in
//! the API layer only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::{store::StoreError, token::TokenError};

/// Generic message for every login failure (unknown email, wrong password, lockout).
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
/// Generic message for refresh/revoke failures that are not expiry related.
pub const INVALID_REFRESH_TOKEN: &str = "Invalid refresh token";
/// Generic message for reset-token failures.
pub const INVALID_RESET_TOKEN: &str = "Invalid or expired reset token";
/// No access credential was presented.
pub const AUTHENTICATION_REQUIRED: &str = "Authentication required";
/// Role check failed.
pub const INSUFFICIENT_PERMISSIONS: &str = "Insufficient permissions";
/// Ownership check failed.
pub const ACCESS_DENIED: &str = "Access denied";

/// A single field-level validation failure.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation Failed")]
    Validation(Vec<FieldError>),
    /// Deliberately generic; the message never says which check failed.
    #[error("{0}")]
    Auth(&'static str),
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    TokenInvalid,
    /// Absolute session lifetime reached; the caller must log in again.
    #[error("Session expired")]
    SessionExpired,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("Not found")]
    NotFound,
    #[error("Internal Server Error")]
    Internal(#[source] anyhow::Error),
}

impl ServiceError {
    pub(crate) fn validation(field: &str, message: &str) -> Self {
        Self::Validation(vec![FieldError::new(field, message)])
    }

    /// Kind label used in logs and tests.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Auth(_) => "auth",
            Self::TokenExpired => "token_expired",
            Self::TokenInvalid => "token_invalid",
            Self::SessionExpired => "session_expired",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound => "not_found",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::validation("email", "Email is already in use"),
            other => Self::Internal(other.into()),
        }
    }
}

impl From<TokenError> for ServiceError {
    fn from(err: TokenError) -> Self {
        if err.is_expired() {
            Self::TokenExpired
        } else {
            Self::TokenInvalid
        }
    }
}
