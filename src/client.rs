//! HTTP client for the authgate API.
//!
//! The access token lives in memory, the refresh token in the cookie jar.
//! An expired access token costs at most one `POST /refresh-token` and one
//! retry of the original request; anything else surfaces as
//! [`ClientError::Unauthenticated`].

use reqwest::{header::WWW_AUTHENTICATE, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::{
    api::{AccessTokenData, Envelope, LoginData, EXPIRED_TOKEN_CHALLENGE},
    auth::{Account, FieldError},
    APP_USER_AGENT,
};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("request failed with {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
        errors: Vec<FieldError>,
    },
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

#[derive(Debug)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
    access_token: RwLock<Option<String>>,
}

impl AuthClient {
    /// # Errors
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(APP_USER_AGENT)
            .cookie_store(true)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            access_token: RwLock::new(None),
        })
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    /// # Errors
    /// Returns [`ClientError::Api`] with field errors when validation fails.
    pub async fn signup(&self, email: &str, password: &str) -> Result<Account, ClientError> {
        let response = self
            .http
            .post(self.url("/signup")?)
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        decode(response).await
    }

    /// Log in and keep the access token for later calls.
    ///
    /// # Errors
    /// Returns [`ClientError::Unauthenticated`] on bad credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<Account, ClientError> {
        let response = self
            .http
            .post(self.url("/login")?)
            .json(&json!({"email": email, "password": password}))
            .send()
            .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        let data: LoginData = decode(response).await?;
        *self.access_token.write().await = Some(data.access_token);
        Ok(data.user)
    }

    /// Rotate the refresh cookie and replace the access token.
    ///
    /// # Errors
    /// Returns [`ClientError::Unauthenticated`] when the session cannot be refreshed.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let response = self.http.post(self.url("/refresh-token")?).send().await?;
        if !response.status().is_success() {
            *self.access_token.write().await = None;
            return Err(ClientError::Unauthenticated);
        }
        let data: AccessTokenData = decode(response).await?;
        *self.access_token.write().await = Some(data.access_token);
        Ok(())
    }

    /// # Errors
    /// Returns an error if the server rejects the logout.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let response = self.send(Method::POST, "/logout", None::<&()>).await?;
        *self.access_token.write().await = None;
        expect_success(response).await
    }

    /// # Errors
    /// Returns an error if the account is not visible to the caller.
    pub async fn get_user(&self, id: Uuid) -> Result<Account, ClientError> {
        let response = self
            .send(Method::GET, &format!("/users/{id}"), None::<&()>)
            .await?;
        decode(response).await
    }

    /// # Errors
    /// Returns an error unless the caller is an admin.
    pub async fn revoke_sessions(&self, id: Uuid) -> Result<(), ClientError> {
        let response = self
            .send(Method::DELETE, &format!("/users/{id}/sessions"), None::<&()>)
            .await?;
        expect_success(response).await
    }

    /// Send an authorized request, refreshing once if the access token expired.
    ///
    /// # Errors
    /// Returns [`ClientError::Unauthenticated`] for any 401 that a single
    /// refresh does not cure.
    pub async fn send<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let response = self.authorized(method.clone(), path, body).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !is_expired(&response) {
            return Err(ClientError::Unauthenticated);
        }

        debug!("Access token expired, refreshing");
        self.refresh().await?;

        let retry = self.authorized(method, path, body).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        Ok(retry)
    }

    async fn authorized<B: Serialize + Sync>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ClientError> {
        let mut request = self.http.request(method, self.url(path)?);
        if let Some(token) = self.access_token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(path)?)
    }
}

fn is_expired(response: &Response) -> bool {
    response
        .headers()
        .get(WWW_AUTHENTICATE)
        .and_then(|value| value.to_str().ok())
        == Some(EXPIRED_TOKEN_CHALLENGE)
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(api_error(status, response).await);
    }
    let envelope: Envelope<T> = response.json().await?;
    envelope
        .data
        .ok_or_else(|| ClientError::UnexpectedResponse("missing data".to_string()))
}

async fn expect_success(response: Response) -> Result<(), ClientError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(api_error(status, response).await)
    }
}

async fn api_error(status: StatusCode, response: Response) -> ClientError {
    match response.json::<Envelope<serde_json::Value>>().await {
        Ok(envelope) => ClientError::Api {
            status,
            message: envelope.message.unwrap_or_default(),
            errors: envelope.errors.unwrap_or_default(),
        },
        Err(_) => ClientError::Api {
            status,
            message: status.to_string(),
            errors: Vec::new(),
        },
    }
}
