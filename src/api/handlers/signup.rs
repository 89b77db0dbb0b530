use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::instrument;

use super::types::SignupRequest;
use crate::{
    api::error::Envelope,
    auth::{Account, AuthService, ServiceError, SignupInput},
};

#[utoipa::path(
    post,
    path = "/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = Envelope<Account>),
        (status = 400, description = "Validation failed")
    ),
    tag = "auth"
)]
#[instrument(skip(auth, payload))]
pub async fn signup(
    auth: Extension<Arc<AuthService>>,
    payload: Option<Json<SignupRequest>>,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(Json(request)) = payload else {
        return Err(ServiceError::validation("body", "Missing payload"));
    };

    let account = auth
        .signup(SignupInput {
            email: request.email,
            password: SecretString::from(request.password),
            first_name: request.first_name,
            last_name: request.last_name,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(Envelope::data(account))))
}
