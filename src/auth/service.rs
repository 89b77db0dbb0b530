//! Session lifecycle: signup, login, refresh rotation, revocation, reset.
//!
//! Flow Overview:
//! 1) `login` claims an attempt against the lockout, verifies the password,
//!    fixes the absolute session expiry and issues an access/refresh pair.
//!    Only the refresh hash is stored.
//! 2) `refresh` verifies the presented token, checks the absolute expiry, then
//!    swaps the stored hash with a compare-and-swap. A presented token that is
//!    not the current one is treated as stolen and the session is revoked.
//! 3) `verify_access` is pure: signature and expiry only, no store lookup.
//!
//! Security boundary: every failure leaving this module is a [`ServiceError`];
//! login and reset failures are deliberately indistinguishable.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use ulid::Ulid;
use uuid::Uuid;

use super::{
    clock::{Clock, SystemClock},
    config::AuthConfig,
    error::{FieldError, ServiceError, INVALID_CREDENTIALS, INVALID_REFRESH_TOKEN, INVALID_RESET_TOKEN},
    guard::Identity,
    mailer::{LogResetMailer, ResetMailer, ResetMessage},
    password::PasswordHasher,
    store::{Account, AccountRecord, CredentialStore, NewAccount, Role},
    token::{AccessClaims, RefreshClaims, TokenCodec, Verified},
    utils::{
        build_reset_url, generate_reset_token, hash_token, normalize_email, normalize_name,
        password_policy_violation, valid_email,
    },
};

/// Signup payload after transport decoding.
#[derive(Debug)]
pub struct SignupInput {
    pub email: String,
    pub password: SecretString,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TokenPair(***)")
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: Account,
    pub tokens: TokenPair,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    hasher: PasswordHasher,
    access: TokenCodec,
    refresh: TokenCodec,
    clock: Arc<dyn Clock>,
    mailer: Arc<dyn ResetMailer>,
    config: AuthConfig,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("hasher", &self.hasher)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        hasher: PasswordHasher,
        access: TokenCodec,
        refresh: TokenCodec,
        config: AuthConfig,
    ) -> Self {
        Self {
            store,
            hasher,
            access,
            refresh,
            clock: Arc::new(SystemClock),
            mailer: Arc::new(LogResetMailer),
            config,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_mailer(mut self, mailer: Arc<dyn ResetMailer>) -> Self {
        self.mailer = mailer;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Reachability of the backing store (health checks).
    ///
    /// # Errors
    /// Returns `Internal` when the store does not answer in time.
    pub async fn ping(&self) -> Result<(), ServiceError> {
        Ok(self.store.ping().await?)
    }

    /// Create an account. The role is always the default one.
    ///
    /// # Errors
    /// `Validation` with every failing field; duplicate email is reported on `email`.
    #[instrument(skip(self, input))]
    pub async fn signup(&self, input: SignupInput) -> Result<Account, ServiceError> {
        let mut errors = Vec::new();

        let email = normalize_email(&input.email);
        if email.is_empty() {
            errors.push(FieldError::new("email", "Email is required"));
        } else if !valid_email(&email) {
            errors.push(FieldError::new("email", "Invalid email address"));
        }

        let password = input.password.expose_secret();
        if password.is_empty() {
            errors.push(FieldError::new("password", "Password is required"));
        } else if let Some(message) = password_policy_violation(password) {
            errors.push(FieldError::new("password", message));
        }

        let first_name = normalize_name(input.first_name.as_deref())
            .map_err(|message| errors.push(FieldError::new("firstName", message)))
            .ok()
            .flatten();
        let last_name = normalize_name(input.last_name.as_deref())
            .map_err(|message| errors.push(FieldError::new("lastName", message)))
            .ok()
            .flatten();

        if !errors.is_empty() {
            return Err(ServiceError::Validation(errors));
        }

        let password_hash = self
            .hasher
            .hash(input.password)
            .await
            .map_err(|err| ServiceError::Internal(err.into()))?;

        let record = self
            .store
            .insert(NewAccount {
                email,
                first_name,
                last_name,
                password_hash,
                role: Role::default(),
            })
            .await?;

        info!(account_id = %record.id, "account created");
        Ok(Account::from(&record))
    }

    /// Verify credentials and open a session.
    ///
    /// # Errors
    /// `Auth(INVALID_CREDENTIALS)` for unknown email, wrong password and lockout alike.
    #[instrument(skip(self, email, password))]
    pub async fn login(
        &self,
        email: &str,
        password: SecretString,
    ) -> Result<LoginOutcome, ServiceError> {
        let email = normalize_email(email);
        let Some(record) = self.store.find_by_email(&email).await? else {
            self.hasher.verify_dummy(password).await;
            return Err(ServiceError::Auth(INVALID_CREDENTIALS));
        };

        let now = self.clock.now();
        let max_attempts = self.config.max_failed_logins();
        let claimed = self
            .store
            .claim_login_attempt(record.id, now, now - self.config.lockout(), max_attempts)
            .await?;
        let Some(attempt) = claimed else {
            // Same cost as a real verification, without touching the real hash.
            self.hasher.verify_dummy(password).await;
            warn!(account_id = %record.id, "login rejected: account locked");
            return Err(ServiceError::Auth(INVALID_CREDENTIALS));
        };

        if !self
            .hasher
            .verify(password, record.password_hash.clone())
            .await
        {
            if max_attempts > 0 && attempt >= max_attempts {
                warn!(account_id = %record.id, attempt, "account locked after failed logins");
            }
            return Err(ServiceError::Auth(INVALID_CREDENTIALS));
        }

        let absolute_expiry = now + self.config.session_max_age();
        let tokens = self.issue_pair(&record, absolute_expiry.timestamp(), now)?;
        self.store
            .record_login_success(record.id, now, &hash_token(&tokens.refresh_token))
            .await?;

        let mut account = Account::from(&record);
        account.failed_login_attempts = 0;
        account.last_login_attempt = Some(now);

        info!(account_id = %record.id, "login succeeded");
        Ok(LoginOutcome { account, tokens })
    }

    /// Rotate a refresh token.
    ///
    /// The successor keeps the original absolute expiry.
    ///
    /// # Errors
    /// - `TokenExpired`/`TokenInvalid` if the token does not verify.
    /// - `SessionExpired` once the absolute expiry has passed.
    /// - `Auth(INVALID_REFRESH_TOKEN)` when the token is not the current one; the
    ///   session is revoked in that case.
    #[instrument(skip(self, presented))]
    pub async fn refresh(&self, presented: &str) -> Result<TokenPair, ServiceError> {
        let now = self.clock.now();
        let Verified { claims, .. } = self.refresh.verify::<RefreshClaims>(presented, now)?;
        let presented_hash = hash_token(presented);

        if now.timestamp() > claims.abs_exp {
            // Drop the stored hash if this was still the live token.
            self.store.revoke_refresh_hash(&presented_hash).await?;
            info!(account_id = %claims.sub, "session reached absolute expiry");
            return Err(ServiceError::SessionExpired);
        }

        let Some(record) = self.store.find_by_id(claims.sub).await? else {
            return Err(ServiceError::Auth(INVALID_REFRESH_TOKEN));
        };

        if record.refresh_token_hash.as_deref() != Some(presented_hash.as_slice()) {
            return Err(self.reuse_detected(record.id).await);
        }

        let tokens = self.issue_pair(&record, claims.abs_exp, now)?;
        let swapped = self
            .store
            .swap_refresh_hash(record.id, &presented_hash, &hash_token(&tokens.refresh_token))
            .await?;
        if !swapped {
            // Lost a race against another rotation of the same token.
            return Err(self.reuse_detected(record.id).await);
        }

        Ok(tokens)
    }

    /// Revoke the session that currently holds `refresh_token`.
    ///
    /// # Errors
    /// `Auth(INVALID_REFRESH_TOKEN)` if no account holds it (already revoked or rotated).
    #[instrument(skip(self, refresh_token))]
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), ServiceError> {
        match self
            .store
            .revoke_refresh_hash(&hash_token(refresh_token))
            .await?
        {
            Some(account_id) => {
                info!(%account_id, "session revoked");
                Ok(())
            }
            None => Err(ServiceError::Auth(INVALID_REFRESH_TOKEN)),
        }
    }

    /// Revoke whatever session `account_id` has, if any.
    ///
    /// # Errors
    /// `NotFound` if the account does not exist.
    #[instrument(skip(self))]
    pub async fn revoke_account(&self, account_id: Uuid) -> Result<(), ServiceError> {
        if self.store.clear_refresh_hash(account_id).await? {
            info!(%account_id, "account session revoked");
            Ok(())
        } else {
            Err(ServiceError::NotFound)
        }
    }

    /// Revoke the presented refresh token, falling back to the caller's own
    /// session when it is missing or no longer current.
    ///
    /// # Errors
    /// Only store failures; a missing session is not an error here.
    #[instrument(skip(self, identity, refresh_token), fields(account_id = %identity.id))]
    pub async fn logout(
        &self,
        identity: &Identity,
        refresh_token: Option<&str>,
    ) -> Result<(), ServiceError> {
        if let Some(token) = refresh_token {
            match self.revoke(token).await {
                Ok(()) => return Ok(()),
                Err(ServiceError::Auth(_)) => {}
                Err(err) => return Err(err),
            }
        }
        match self.revoke_account(identity.id).await {
            Ok(()) | Err(ServiceError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Start a password reset. The outcome never depends on whether `email` exists.
    ///
    /// # Errors
    /// `Validation` for an empty email, `Internal` for store failures.
    #[instrument(skip(self, email))]
    pub async fn generate_reset_token(&self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(ServiceError::validation("email", "Email is required"));
        }
        let Some(record) = self.store.find_by_email(&email).await? else {
            return Ok(());
        };

        let token = generate_reset_token().map_err(ServiceError::Internal)?;
        let expires_at = self.clock.now() + self.config.reset_token_ttl();
        self.store
            .set_reset_token(record.id, &hash_token(&token), expires_at)
            .await?;

        let message = ResetMessage {
            to_email: record.email,
            reset_url: build_reset_url(self.config.frontend_base_url(), &token),
            expires_at,
        };
        // Detached: response time must not depend on the mailer.
        let mailer = Arc::clone(&self.mailer);
        let account_id = record.id;
        tokio::task::spawn_blocking(move || {
            if let Err(err) = mailer.send(&message) {
                error!(%account_id, "Failed to send reset email: {err:#}");
            }
        });
        Ok(())
    }

    /// Consume a reset token and set a new password. Also ends any active session.
    ///
    /// # Errors
    /// `Validation` for a weak password, `Auth(INVALID_RESET_TOKEN)` for a bad,
    /// expired or already used token.
    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: SecretString,
    ) -> Result<(), ServiceError> {
        if let Some(message) = password_policy_violation(new_password.expose_secret()) {
            return Err(ServiceError::validation("password", message));
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::Auth(INVALID_RESET_TOKEN));
        }

        let password_hash = self
            .hasher
            .hash(new_password)
            .await
            .map_err(|err| ServiceError::Internal(err.into()))?;

        match self
            .store
            .consume_reset_token(&hash_token(token), self.clock.now(), &password_hash)
            .await?
        {
            Some(account_id) => {
                info!(%account_id, "password reset completed");
                Ok(())
            }
            None => {
                warn!("invalid reset token attempt");
                Err(ServiceError::Auth(INVALID_RESET_TOKEN))
            }
        }
    }

    /// Verify an access token. Pure: no store access.
    ///
    /// # Errors
    /// `TokenExpired` or `TokenInvalid`.
    pub fn verify_access(&self, token: &str) -> Result<Identity, ServiceError> {
        let verified = self.access.verify::<AccessClaims>(token, self.clock.now())?;
        Ok(Identity::from(verified.claims))
    }

    /// # Errors
    /// `NotFound` if the account does not exist.
    pub async fn account(&self, account_id: Uuid) -> Result<Account, ServiceError> {
        self.store
            .find_by_id(account_id)
            .await?
            .map(|record| Account::from(&record))
            .ok_or(ServiceError::NotFound)
    }

    fn issue_pair(
        &self,
        record: &AccountRecord,
        absolute_expiry: i64,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, ServiceError> {
        let access_claims = AccessClaims {
            sub: record.id,
            email: record.email.clone(),
            role: record.role,
            jti: Ulid::new().to_string(),
        };
        let refresh_claims = RefreshClaims {
            sub: record.id,
            abs_exp: absolute_expiry,
            jti: Ulid::new().to_string(),
        };
        let access_token = self
            .access
            .issue(&access_claims, now, self.config.access_token_ttl())
            .map_err(|err| ServiceError::Internal(anyhow!(err).context("sign access token")))?;
        let refresh_token = self
            .refresh
            .issue(&refresh_claims, now, self.config.refresh_token_ttl())
            .map_err(|err| ServiceError::Internal(anyhow!(err).context("sign refresh token")))?;
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    async fn reuse_detected(&self, account_id: Uuid) -> ServiceError {
        warn!(%account_id, "refresh token reuse detected; revoking session");
        match self.store.clear_refresh_hash(account_id).await {
            Ok(_) => ServiceError::Auth(INVALID_REFRESH_TOKEN),
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{clock::ManualClock, store::MemoryStore};
    use chrono::Duration;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Mutex,
    };

    const ACCESS_KEY: &str = "test-access-key-test-access-key-0000";
    const REFRESH_KEY: &str = "test-refresh-key-test-refresh-key-000";

    #[derive(Default)]
    struct CapturingMailer {
        sent: Mutex<Vec<ResetMessage>>,
    }

    impl CapturingMailer {
        fn last_token(&self) -> Option<String> {
            let sent = self.sent.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            sent.last()
                .and_then(|message| message.reset_url.split("#token=").nth(1))
                .map(ToString::to_string)
        }

        // Delivery is detached from the request.
        async fn delivered_token(&self) -> anyhow::Result<String> {
            for _ in 0..200 {
                if let Some(token) = self.last_token() {
                    return Ok(token);
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
            Err(anyhow!("no reset email"))
        }

        fn count(&self) -> usize {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .len()
        }
    }

    impl ResetMailer for CapturingMailer {
        fn send(&self, message: &ResetMessage) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(message.clone());
            Ok(())
        }
    }

    /// Blocks delivery until the test releases it.
    struct GatedMailer {
        gate: Mutex<mpsc::Receiver<()>>,
        delivered: AtomicBool,
    }

    impl ResetMailer for GatedMailer {
        fn send(&self, _message: &ResetMessage) -> anyhow::Result<()> {
            self.gate
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .recv_timeout(std::time::Duration::from_secs(2))?;
            self.delivered.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        service: AuthService,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        mailer: Arc<CapturingMailer>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
        ));
        let mailer = Arc::new(CapturingMailer::default());
        let hasher = PasswordHasher::new(1024, 1, 1, 2).unwrap_or_else(|err| panic!("{err}"));
        let codec = |key: &str| {
            TokenCodec::new(SecretString::from(key.to_string()))
                .unwrap_or_else(|err| panic!("{err}"))
        };
        let service = AuthService::new(
            store.clone(),
            hasher,
            codec(ACCESS_KEY),
            codec(REFRESH_KEY),
            AuthConfig::new("http://localhost:3000".to_string()),
        )
        .with_clock(clock.clone())
        .with_mailer(mailer.clone());
        Harness {
            service,
            store,
            clock,
            mailer,
        }
    }

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn signup_input(email: &str, password: &str) -> SignupInput {
        SignupInput {
            email: email.to_string(),
            password: secret(password),
            first_name: None,
            last_name: None,
        }
    }

    async fn signed_up(h: &Harness) -> anyhow::Result<Account> {
        Ok(h.service.signup(signup_input("a@x.com", "Abc12345")).await?)
    }

    fn message(err: &ServiceError) -> String {
        err.to_string()
    }

    #[tokio::test]
    async fn signup_login_refresh_scenario() -> anyhow::Result<()> {
        let h = harness();
        let account = signed_up(&h).await?;
        assert_eq!(account.role, Role::Manager);

        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;
        assert_eq!(outcome.account.id, account.id);

        let identity = h.service.verify_access(&outcome.tokens.access_token)?;
        assert_eq!(identity.id, account.id);
        assert_eq!(identity.email, "a@x.com");

        let rotated = h.service.refresh(&outcome.tokens.refresh_token).await?;
        assert_ne!(rotated.refresh_token, outcome.tokens.refresh_token);
        assert_ne!(rotated.access_token, outcome.tokens.access_token);
        Ok(())
    }

    #[tokio::test]
    async fn signup_collects_field_errors() {
        let h = harness();
        let result = h
            .service
            .signup(SignupInput {
                email: "nope".to_string(),
                password: secret("short"),
                first_name: Some("A".to_string()),
                last_name: None,
            })
            .await;
        match result {
            Err(ServiceError::Validation(errors)) => {
                let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
                assert_eq!(fields, vec!["email", "password", "firstName"]);
                assert!(errors.iter().all(|e| !e.message.contains("short")));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn signup_requires_password_and_unique_email() -> anyhow::Result<()> {
        let h = harness();
        assert!(matches!(
            h.service.signup(signup_input("a@x.com", "")).await,
            Err(ServiceError::Validation(errors)) if errors[0].message == "Password is required"
        ));

        signed_up(&h).await?;
        let duplicate = h.service.signup(signup_input(" A@X.com ", "Abc12345")).await;
        assert!(matches!(
            duplicate,
            Err(ServiceError::Validation(errors)) if errors[0].field == "email"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;

        let unknown = h
            .service
            .login("nobody@x.com", secret("Abc12345"))
            .await
            .err()
            .ok_or_else(|| anyhow!("unknown email logged in"))?;
        let wrong = h
            .service
            .login("a@x.com", secret("Wrong1234"))
            .await
            .err()
            .ok_or_else(|| anyhow!("wrong password logged in"))?;

        assert_eq!(unknown.kind(), wrong.kind());
        assert_eq!(message(&unknown), message(&wrong));
        assert_eq!(message(&wrong), INVALID_CREDENTIALS);
        Ok(())
    }

    #[tokio::test]
    async fn lockout_after_repeated_failures_then_lapses() -> anyhow::Result<()> {
        let h = harness();
        let account = signed_up(&h).await?;

        for _ in 0..5 {
            assert!(h.service.login("a@x.com", secret("Wrong1234")).await.is_err());
        }
        let record = h.store.find_by_id(account.id).await?;
        assert_eq!(record.map(|r| r.failed_login_attempts), Some(5));

        // Correct password is refused with the same message while locked.
        let locked = h.service.login("a@x.com", secret("Abc12345")).await;
        assert!(matches!(locked, Err(ServiceError::Auth(INVALID_CREDENTIALS))));

        h.clock.advance(Duration::minutes(16));
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;
        assert_eq!(outcome.account.failed_login_attempts, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_passwords_stop_at_the_limit() -> anyhow::Result<()> {
        let h = harness();
        let account = signed_up(&h).await?;
        let service = Arc::new(h.service);

        let mut attempts = tokio::task::JoinSet::new();
        for _ in 0..20 {
            let service = Arc::clone(&service);
            attempts.spawn(async move { service.login("a@x.com", secret("Wrong1234")).await });
        }
        while let Some(result) = attempts.join_next().await {
            assert!(matches!(result?, Err(ServiceError::Auth(INVALID_CREDENTIALS))));
        }

        // Only the claimed attempts reached the counter.
        let record = h.store.find_by_id(account.id).await?;
        assert_eq!(record.map(|r| r.failed_login_attempts), Some(5));
        assert!(service.login("a@x.com", secret("Abc12345")).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn failure_count_restarts_after_the_window() -> anyhow::Result<()> {
        let h = harness();
        let account = signed_up(&h).await?;

        for _ in 0..5 {
            assert!(h.service.login("a@x.com", secret("Wrong1234")).await.is_err());
        }
        h.clock.advance(Duration::minutes(16));

        // One typo after the window is a first strike, not a new lockout.
        assert!(h.service.login("a@x.com", secret("Wrong1234")).await.is_err());
        let record = h.store.find_by_id(account.id).await?;
        assert_eq!(record.map(|r| r.failed_login_attempts), Some(1));
        assert!(h.service.login("a@x.com", secret("Abc12345")).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn reset_email_is_sent_off_the_request_path() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let (release, gate) = mpsc::channel();
        let mailer = Arc::new(GatedMailer {
            gate: Mutex::new(gate),
            delivered: AtomicBool::new(false),
        });
        let service = h.service.with_mailer(mailer.clone());

        service.generate_reset_token("a@x.com").await?;
        assert!(!mailer.delivered.load(Ordering::SeqCst));

        release.send(())?;
        for _ in 0..200 {
            if mailer.delivered.load(Ordering::SeqCst) {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        Err(anyhow!("reset email never delivered"))
    }

    #[tokio::test]
    async fn refresh_token_reuse_revokes_session() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;

        let rotated = h.service.refresh(&outcome.tokens.refresh_token).await?;

        let replay = h.service.refresh(&outcome.tokens.refresh_token).await;
        assert!(matches!(replay, Err(ServiceError::Auth(INVALID_REFRESH_TOKEN))));

        // The legitimate successor is dead too until the next login.
        let after = h.service.refresh(&rotated.refresh_token).await;
        assert!(matches!(after, Err(ServiceError::Auth(INVALID_REFRESH_TOKEN))));

        let relogin = h.service.login("a@x.com", secret("Abc12345")).await?;
        assert!(h.service.refresh(&relogin.tokens.refresh_token).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_refresh_has_single_winner() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;
        let token = outcome.tokens.refresh_token;

        let (first, second) = tokio::join!(h.service.refresh(&token), h.service.refresh(&token));
        assert_eq!(usize::from(first.is_ok()) + usize::from(second.is_ok()), 1);
        Ok(())
    }

    #[tokio::test]
    async fn absolute_expiry_survives_rotation() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;

        let mut refresh_token = outcome.tokens.refresh_token;
        for _ in 0..6 {
            h.clock.advance(Duration::days(1));
            refresh_token = h.service.refresh(&refresh_token).await?.refresh_token;
        }

        // Day 7 plus a second: the latest token is still within its own TTL.
        h.clock.advance(Duration::days(1) + Duration::seconds(1));
        let result = h.service.refresh(&refresh_token).await;
        assert!(matches!(result, Err(ServiceError::SessionExpired)));
        Ok(())
    }

    #[tokio::test]
    async fn access_token_expires_at_fifteen_minutes() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;

        h.clock.advance(Duration::minutes(15) - Duration::seconds(1));
        assert!(h.service.verify_access(&outcome.tokens.access_token).is_ok());

        h.clock.advance(Duration::seconds(1));
        assert!(matches!(
            h.service.verify_access(&outcome.tokens.access_token),
            Err(ServiceError::TokenExpired)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;

        assert!(matches!(
            h.service.verify_access(&outcome.tokens.refresh_token),
            Err(ServiceError::TokenInvalid)
        ));
        assert!(matches!(
            h.service.refresh(&outcome.tokens.access_token).await,
            Err(ServiceError::TokenInvalid)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn revoke_only_once() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;

        h.service.revoke(&outcome.tokens.refresh_token).await?;
        assert!(matches!(
            h.service.revoke(&outcome.tokens.refresh_token).await,
            Err(ServiceError::Auth(INVALID_REFRESH_TOKEN))
        ));
        assert!(h.service.refresh(&outcome.tokens.refresh_token).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn logout_without_cookie_clears_own_session() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let outcome = h.service.login("a@x.com", secret("Abc12345")).await?;
        let identity = h.service.verify_access(&outcome.tokens.access_token)?;

        h.service.logout(&identity, None).await?;
        assert!(h.service.refresh(&outcome.tokens.refresh_token).await.is_err());

        // Idempotent.
        h.service.logout(&identity, Some("stale")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn revoke_account_unknown_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.revoke_account(Uuid::new_v4()).await,
            Err(ServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn reset_token_flow_is_single_use() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        let session = h.service.login("a@x.com", secret("Abc12345")).await?;

        h.service.generate_reset_token("A@x.com").await?;
        let token = h.mailer.delivered_token().await?;
        let record = h.store.find_by_email("a@x.com").await?;
        let stored = record.and_then(|r| r.reset_token_hash);
        assert_eq!(stored, Some(hash_token(&token)));

        h.service.reset_password(&token, secret("Newpass123")).await?;
        assert!(matches!(
            h.service.reset_password(&token, secret("Other1234")).await,
            Err(ServiceError::Auth(INVALID_RESET_TOKEN))
        ));

        // Old password and old session are gone.
        assert!(h.service.login("a@x.com", secret("Abc12345")).await.is_err());
        assert!(h.service.refresh(&session.tokens.refresh_token).await.is_err());
        assert!(h.service.login("a@x.com", secret("Newpass123")).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn reset_token_expires_after_a_day() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        h.service.generate_reset_token("a@x.com").await?;
        let token = h.mailer.delivered_token().await?;

        h.clock.advance(Duration::hours(24));
        assert!(matches!(
            h.service.reset_password(&token, secret("Newpass123")).await,
            Err(ServiceError::Auth(INVALID_RESET_TOKEN))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn reset_for_unknown_email_looks_the_same() -> anyhow::Result<()> {
        let h = harness();
        h.service.generate_reset_token("ghost@x.com").await?;
        assert_eq!(h.mailer.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_weak_password_before_consuming() -> anyhow::Result<()> {
        let h = harness();
        signed_up(&h).await?;
        h.service.generate_reset_token("a@x.com").await?;
        let token = h.mailer.delivered_token().await?;

        assert!(matches!(
            h.service.reset_password(&token, secret("weak")).await,
            Err(ServiceError::Validation(_))
        ));
        h.service.reset_password(&token, secret("Strong123")).await?;
        Ok(())
    }

    #[tokio::test]
    async fn account_lookup() -> anyhow::Result<()> {
        let h = harness();
        let account = signed_up(&h).await?;
        assert_eq!(h.service.account(account.id).await?.email, "a@x.com");
        assert!(matches!(
            h.service.account(Uuid::new_v4()).await,
            Err(ServiceError::NotFound)
        ));
        Ok(())
    }
}
