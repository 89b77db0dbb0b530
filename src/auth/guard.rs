//! Authorization decisions behind the request gates.
//!
//! These are pure functions over an already verified [`Identity`]. The axum
//! middleware in `api::middleware` only extracts inputs and maps the result.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    error::{ServiceError, ACCESS_DENIED, AUTHENTICATION_REQUIRED, INSUFFICIENT_PERMISSIONS},
    store::Role,
    token::AccessClaims,
};

/// Caller identity attached to a request after access-token verification.
#[derive(ToSchema, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

impl From<AccessClaims> for Identity {
    fn from(claims: AccessClaims) -> Self {
        Self {
            id: claims.sub,
            email: claims.email,
            role: claims.role,
        }
    }
}

/// Role gate. An empty `allowed` list admits any authenticated caller.
///
/// # Errors
/// `Auth` when no identity is attached, `Forbidden` when the role is not allowed.
pub fn authorize_roles(identity: Option<&Identity>, allowed: &[Role]) -> Result<(), ServiceError> {
    let identity = identity.ok_or(ServiceError::Auth(AUTHENTICATION_REQUIRED))?;
    if allowed.is_empty() || allowed.contains(&identity.role) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(INSUFFICIENT_PERMISSIONS))
    }
}

/// Ownership gate: admins pass, everyone else must own `resource_id`.
///
/// # Errors
/// `Auth` when no identity is attached, `Forbidden` on mismatch.
pub fn authorize_owner(identity: Option<&Identity>, resource_id: Uuid) -> Result<(), ServiceError> {
    let identity = identity.ok_or(ServiceError::Auth(AUTHENTICATION_REQUIRED))?;
    if identity.role == Role::Admin || identity.id == resource_id {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(ACCESS_DENIED))
    }
}
