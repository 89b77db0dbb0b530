use super::*;
use crate::auth::{
    AuthConfig, Clock, CredentialStore, ManualClock, MemoryStore, PasswordHasher, Role,
    TokenCodec,
};
use anyhow::{anyhow, Result};
use axum::{
    body::to_bytes,
    http::{
        header::{CACHE_CONTROL, COOKIE, SET_COOKIE, WWW_AUTHENTICATE},
        HeaderMap, StatusCode,
    },
};
use chrono::{DateTime, Duration};
use secrecy::SecretString;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl Reply {
    fn refresh_cookie(&self) -> Option<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .find(|value| value.starts_with(&format!("{REFRESH_COOKIE_NAME}=")))
            .map(ToString::to_string)
    }

    /// `name=value` pair ready for a `Cookie` request header.
    fn cookie_pair(&self) -> Result<String> {
        let cookie = self
            .refresh_cookie()
            .ok_or_else(|| anyhow!("no refresh cookie"))?;
        cookie
            .split(';')
            .next()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("malformed cookie"))
    }

    fn access_token(&self) -> Result<String> {
        self.body["data"]["accessToken"]
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| anyhow!("no access token in {}", self.body))
    }
}

fn test_app() -> Result<TestApp> {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
    ));
    let service = AuthService::new(
        store.clone(),
        PasswordHasher::new(1024, 1, 1, 2)?,
        TokenCodec::new(SecretString::from(
            "router-access-key-router-access-key".to_string(),
        ))?,
        TokenCodec::new(SecretString::from(
            "router-refresh-key-router-refresh-key".to_string(),
        ))?,
        AuthConfig::new("http://localhost:3000".to_string()).with_cookie_secure(false),
    )
    .with_clock(clock.clone());
    Ok(TestApp {
        router: app(Arc::new(service))?,
        store,
        clock,
    })
}

async fn send(app: &TestApp, request: Request<Body>) -> Result<Reply> {
    let response = app.router.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok(Reply {
        status,
        headers,
        body,
    })
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

async fn signup(app: &TestApp, email: &str) -> Result<Uuid> {
    let reply = send(
        app,
        post_json("/signup", &json!({"email": email, "password": "Abc12345"}))?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    reply.body["data"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("no id"))?
        .parse()
        .map_err(Into::into)
}

async fn login(app: &TestApp, email: &str) -> Result<Reply> {
    let reply = send(
        app,
        post_json("/login", &json!({"email": email, "password": "Abc12345"}))?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK, "login failed: {}", reply.body);
    Ok(reply)
}

fn refresh_request(cookie: String) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri("/refresh-token")
        .header(COOKIE, cookie)
        .body(Body::empty())?)
}

fn with_bearer(method: &str, uri: &str, token: &str) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())?)
}

#[tokio::test]
async fn signup_returns_envelope_and_rejects_duplicates() -> Result<()> {
    let app = test_app()?;
    let reply = send(
        &app,
        post_json("/signup", &json!({"email": "a@x.com", "password": "Abc12345", "firstName": "Ada"}))?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.body["status"], "success");
    assert_eq!(reply.body["data"]["email"], "a@x.com");
    assert_eq!(reply.body["data"]["firstName"], "Ada");
    assert_eq!(reply.body["data"]["role"], "manager");
    assert!(!reply.body.to_string().contains("Abc12345"));
    assert!(reply.body["data"].get("passwordHash").is_none());

    let duplicate = send(
        &app,
        post_json("/signup", &json!({"email": "a@x.com", "password": "Abc12345"}))?,
    )
    .await?;
    assert_eq!(duplicate.status, StatusCode::BAD_REQUEST);
    assert_eq!(duplicate.body["status"], "error");
    assert_eq!(duplicate.body["errors"][0]["field"], "email");
    Ok(())
}

#[tokio::test]
async fn login_sets_refresh_cookie_and_returns_access_token() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;
    let reply = login(&app, "a@x.com").await?;

    assert_eq!(reply.body["status"], "success");
    assert_eq!(reply.body["data"]["user"]["email"], "a@x.com");
    let access_token = reply.access_token()?;

    let cookie = reply
        .refresh_cookie()
        .ok_or_else(|| anyhow!("no refresh cookie"))?;
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Strict"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(!cookie.contains(&access_token));

    // The refresh token never appears in the body.
    let pair = reply.cookie_pair()?;
    let refresh_value = pair.trim_start_matches("refresh_token=");
    assert!(!reply.body.to_string().contains(refresh_value));
    Ok(())
}

#[tokio::test]
async fn login_failures_are_identical() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;

    let unknown = send(
        &app,
        post_json("/login", &json!({"email": "ghost@x.com", "password": "Abc12345"}))?,
    )
    .await?;
    let wrong = send(
        &app,
        post_json("/login", &json!({"email": "a@x.com", "password": "Wrong1234"}))?,
    )
    .await?;

    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status, wrong.status);
    assert_eq!(unknown.body, wrong.body);
    assert_eq!(wrong.body["message"], "Invalid email or password");
    assert!(unknown.refresh_cookie().is_none());
    Ok(())
}

#[tokio::test]
async fn refresh_rotates_cookie_and_detects_reuse() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;
    let login = login(&app, "a@x.com").await?;
    let original = login.cookie_pair()?;

    let rotated = send(&app, refresh_request(original.clone())?).await?;
    assert_eq!(rotated.status, StatusCode::OK);
    assert_eq!(
        rotated.headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    assert_ne!(rotated.access_token()?, login.access_token()?);
    let next = rotated.cookie_pair()?;
    assert_ne!(next, original);

    let replay = send(&app, refresh_request(original)?).await?;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(replay.body["message"], "Invalid refresh token");

    // Reuse revoked the whole session.
    let after = send(&app, refresh_request(next)?).await?;
    assert_eq!(after.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn refresh_without_cookie() -> Result<()> {
    let app = test_app()?;
    let reply = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["message"], "Refresh token not found");
    assert!(reply.headers.get(CACHE_CONTROL).is_some());
    Ok(())
}

#[tokio::test]
async fn expired_access_token_is_distinguishable() -> Result<()> {
    let app = test_app()?;
    let id = signup(&app, "a@x.com").await?;
    let token = login(&app, "a@x.com").await?.access_token()?;

    let fresh = send(&app, with_bearer("GET", &format!("/users/{id}"), &token)?).await?;
    assert_eq!(fresh.status, StatusCode::OK);

    app.clock.advance(Duration::minutes(15));
    let expired = send(&app, with_bearer("GET", &format!("/users/{id}"), &token)?).await?;
    assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        expired
            .headers
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok()),
        Some(EXPIRED_TOKEN_CHALLENGE)
    );

    let garbage = send(&app, with_bearer("GET", &format!("/users/{id}"), "abc.def.ghi")?).await?;
    assert_eq!(garbage.status, StatusCode::UNAUTHORIZED);
    assert!(garbage.headers.get(WWW_AUTHENTICATE).is_none());
    assert_eq!(garbage.body["message"], "Invalid token");
    Ok(())
}

#[tokio::test]
async fn logout_requires_access_token_and_clears_cookie() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;
    let login = login(&app, "a@x.com").await?;

    let anonymous = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/logout")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert_eq!(anonymous.body["message"], "Authentication required");

    let reply = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/logout")
            .header(AUTHORIZATION, format!("Bearer {}", login.access_token()?))
            .header(COOKIE, login.cookie_pair()?)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "success");
    let cleared = reply
        .refresh_cookie()
        .ok_or_else(|| anyhow!("cookie not cleared"))?;
    assert!(cleared.contains("Max-Age=0"));

    let refresh = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/refresh-token")
            .header(COOKIE, login.cookie_pair()?)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn role_gate_admin_only() -> Result<()> {
    let app = test_app()?;
    let manager_id = signup(&app, "manager@x.com").await?;
    let admin_id = signup(&app, "admin@x.com").await?;
    assert!(app.store.set_role(admin_id, Role::Admin));

    let manager = login(&app, "manager@x.com").await?.access_token()?;
    let admin = login(&app, "admin@x.com").await?.access_token()?;
    let uri = format!("/users/{manager_id}/sessions");

    let denied = send(&app, with_bearer("DELETE", &uri, &manager)?).await?;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.body["message"], "Insufficient permissions");

    let allowed = send(&app, with_bearer("DELETE", &uri, &admin)?).await?;
    assert_eq!(allowed.status, StatusCode::OK);

    let missing = send(
        &app,
        with_bearer("DELETE", &format!("/users/{}/sessions", Uuid::new_v4()), &admin)?,
    )
    .await?;
    assert_eq!(missing.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn ownership_gate() -> Result<()> {
    let app = test_app()?;
    let alice = signup(&app, "alice@x.com").await?;
    let bob = signup(&app, "bob@x.com").await?;
    let admin_id = signup(&app, "admin@x.com").await?;
    app.store.set_role(admin_id, Role::Admin);

    let alice_token = login(&app, "alice@x.com").await?.access_token()?;
    let admin_token = login(&app, "admin@x.com").await?.access_token()?;

    let own = send(&app, with_bearer("GET", &format!("/users/{alice}"), &alice_token)?).await?;
    assert_eq!(own.status, StatusCode::OK);
    assert_eq!(own.body["data"]["email"], "alice@x.com");

    let other = send(&app, with_bearer("GET", &format!("/users/{bob}"), &alice_token)?).await?;
    assert_eq!(other.status, StatusCode::FORBIDDEN);
    assert_eq!(other.body["message"], "Access denied");

    let as_admin = send(&app, with_bearer("GET", &format!("/users/{bob}"), &admin_token)?).await?;
    assert_eq!(as_admin.status, StatusCode::OK);

    let unknown = send(
        &app,
        with_bearer("GET", &format!("/users/{}", Uuid::new_v4()), &admin_token)?,
    )
    .await?;
    assert_eq!(unknown.status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn forgot_password_does_not_reveal_accounts() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;

    let known = send(&app, post_json("/forgot-password", &json!({"email": "a@x.com"}))?).await?;
    let unknown = send(
        &app,
        post_json("/forgot-password", &json!({"email": "ghost@x.com"}))?,
    )
    .await?;
    assert_eq!(known.status, StatusCode::OK);
    assert_eq!(known.status, unknown.status);
    assert_eq!(known.body, unknown.body);

    let bad = send(
        &app,
        post_json("/reset-password", &json!({"token": "nope", "password": "Newpass123"}))?,
    )
    .await?;
    assert_eq!(bad.status, StatusCode::UNAUTHORIZED);
    assert_eq!(bad.body["message"], "Invalid or expired reset token");
    Ok(())
}

#[tokio::test]
async fn reset_password_ends_the_session() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;
    let session = login(&app, "a@x.com").await?;

    let id = app
        .store
        .find_by_email("a@x.com")
        .await?
        .map(|record| record.id)
        .ok_or_else(|| anyhow!("account missing"))?;
    let token = "known-reset-token";
    app.store
        .set_reset_token(id, &Sha256::digest(token), app.clock.now() + Duration::hours(1))
        .await?;

    let reply = send(
        &app,
        post_json("/reset-password", &json!({"token": token, "password": "Newpass123"}))?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["status"], "success");
    let cleared = reply
        .refresh_cookie()
        .ok_or_else(|| anyhow!("cookie not cleared"))?;
    assert!(cleared.contains("Max-Age=0"));

    let refresh = send(&app, refresh_request(session.cookie_pair()?)?).await?;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);

    let relogin = send(
        &app,
        post_json("/login", &json!({"email": "a@x.com", "password": "Newpass123"}))?,
    )
    .await?;
    assert_eq!(relogin.status, StatusCode::OK);

    let reused = send(
        &app,
        post_json("/reset-password", &json!({"token": token, "password": "Other1234"}))?,
    )
    .await?;
    assert_eq!(reused.status, StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn refresh_past_absolute_expiry_clears_cookie() -> Result<()> {
    let app = test_app()?;
    signup(&app, "a@x.com").await?;
    let session = login(&app, "a@x.com").await?;

    // Rotate on day six so the latest refresh token outlives the session.
    app.clock.advance(Duration::days(6));
    let rotated = send(&app, refresh_request(session.cookie_pair()?)?).await?;
    assert_eq!(rotated.status, StatusCode::OK);

    app.clock.advance(Duration::days(1) + Duration::seconds(1));
    let expired = send(&app, refresh_request(rotated.cookie_pair()?)?).await?;
    assert_eq!(expired.status, StatusCode::UNAUTHORIZED);
    assert_eq!(expired.body["message"], "Session expired");
    assert_eq!(
        expired.headers.get(CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("no-store")
    );
    let cleared = expired
        .refresh_cookie()
        .ok_or_else(|| anyhow!("cookie not cleared"))?;
    assert!(cleared.contains("Max-Age=0"));
    Ok(())
}

#[tokio::test]
async fn health_and_request_id() -> Result<()> {
    let app = test_app()?;
    let reply = send(
        &app,
        Request::builder()
            .uri("/health")
            .header("x-request-id", "req-123")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body["store"], "ok");
    assert!(reply.headers.get("X-App").is_some());
    assert_eq!(
        reply.headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("req-123")
    );
    Ok(())
}
