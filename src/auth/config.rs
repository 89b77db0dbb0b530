//! Lifetimes and policy knobs for the auth core.

use chrono::Duration;

const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_SESSION_MAX_AGE_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_MAX_FAILED_LOGINS: i32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;

/// Upper bound for every lifetime and window (ten years). Keeps expiry
/// arithmetic on timestamps far from overflow.
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

fn bounded(seconds: i64) -> i64 {
    seconds.clamp(1, MAX_LIFETIME_SECONDS)
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    session_max_age_seconds: i64,
    reset_token_ttl_seconds: i64,
    max_failed_logins: i32,
    lockout_seconds: i64,
    cookie_secure: bool,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url: frontend_base_url.trim_end_matches('/').to_string(),
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            session_max_age_seconds: DEFAULT_SESSION_MAX_AGE_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            max_failed_logins: DEFAULT_MAX_FAILED_LOGINS,
            lockout_seconds: DEFAULT_LOCKOUT_SECONDS,
            cookie_secure: true,
        }
    }

    /// Lifetimes are clamped to `1..=MAX_LIFETIME_SECONDS`.
    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_session_max_age_seconds(mut self, seconds: i64) -> Self {
        self.session_max_age_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = bounded(seconds);
        self
    }

    #[must_use]
    pub fn with_max_failed_logins(mut self, attempts: i32) -> Self {
        self.max_failed_logins = attempts;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout_seconds = bounded(seconds);
        self
    }

    /// Drop the `Secure` cookie attribute (plain-HTTP local development only).
    #[must_use]
    pub fn with_cookie_secure(mut self, secure: bool) -> Self {
        self.cookie_secure = secure;
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        Duration::seconds(self.access_token_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::seconds(self.refresh_token_ttl_seconds)
    }

    /// Absolute session lifetime, fixed at login.
    #[must_use]
    pub fn session_max_age(&self) -> Duration {
        Duration::seconds(self.session_max_age_seconds)
    }

    #[must_use]
    pub fn reset_token_ttl(&self) -> Duration {
        Duration::seconds(self.reset_token_ttl_seconds)
    }

    #[must_use]
    pub const fn max_failed_logins(&self) -> i32 {
        self.max_failed_logins
    }

    #[must_use]
    pub fn lockout(&self) -> Duration {
        Duration::seconds(self.lockout_seconds)
    }

    #[must_use]
    pub const fn cookie_secure(&self) -> bool {
        self.cookie_secure
    }

    /// Max-Age for the refresh cookie.
    #[must_use]
    pub const fn refresh_cookie_max_age_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }
}
