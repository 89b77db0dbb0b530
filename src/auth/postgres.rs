//! Postgres-backed [`CredentialStore`].
//!
//! Schema lives in `sql/schema.sql`. Every query is bounded by the configured
//! timeout and runs inside a `db.query` span.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use std::{future::Future, time::Duration};
use tracing::Instrument;
use uuid::Uuid;

use super::store::{AccountRecord, CredentialStore, NewAccount, StoreError};

#[derive(Clone, Debug)]
pub struct PgCredentialStore {
    pool: PgPool,
    timeout: Duration,
}

impl PgCredentialStore {
    /// Connect a pool; acquiring a connection shares the query timeout.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn connect(
        dsn: &SecretString,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .acquire_timeout(timeout)
            .max_lifetime(Duration::from_secs(60 * 2))
            .test_before_acquire(true)
            .connect(dsn.expose_secret())
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool, timeout))
    }

    #[must_use]
    pub const fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    async fn bounded<T, F>(
        &self,
        operation: &'static str,
        query: &'static str,
        fut: F,
    ) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = operation,
            db.statement = query
        );
        match tokio::time::timeout(self.timeout, fut.instrument(span)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if is_unique_violation(&err) => Err(StoreError::DuplicateEmail),
            Ok(Err(err)) => Err(StoreError::Database(err)),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

fn account_from_row(row: &PgRow) -> Result<AccountRecord, StoreError> {
    let role: String = row.try_get("role")?;
    Ok(AccountRecord {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        password_hash: row.try_get("password_hash")?,
        refresh_token_hash: row.try_get("refresh_token_hash")?,
        reset_token_hash: row.try_get("reset_token_hash")?,
        reset_token_expires_at: row.try_get("reset_token_expires_at")?,
        failed_login_attempts: row.try_get("failed_login_attempts")?,
        last_login_attempt: row.try_get("last_login_attempt")?,
        role: role.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

// Statements are static so they can label spans.
const INSERT_ACCOUNT: &str = r"
    INSERT INTO accounts (email, first_name, last_name, password_hash, role)
    VALUES ($1, $2, $3, $4, $5::account_role)
    RETURNING id, email, first_name, last_name, password_hash,
        refresh_token_hash, reset_token_hash, reset_token_expires_at,
        failed_login_attempts, last_login_attempt, role::text AS role, created_at
";

const SELECT_BY_ID: &str = r"
    SELECT id, email, first_name, last_name, password_hash,
        refresh_token_hash, reset_token_hash, reset_token_expires_at,
        failed_login_attempts, last_login_attempt, role::text AS role, created_at
    FROM accounts WHERE id = $1 AND deleted_at IS NULL
";

const SELECT_BY_EMAIL: &str = r"
    SELECT id, email, first_name, last_name, password_hash,
        refresh_token_hash, reset_token_hash, reset_token_expires_at,
        failed_login_attempts, last_login_attempt, role::text AS role, created_at
    FROM accounts WHERE email = $1 AND deleted_at IS NULL
";

const LOGIN_SUCCESS: &str = r"
    UPDATE accounts
    SET failed_login_attempts = 0, last_login_attempt = $2,
        refresh_token_hash = $3, updated_at = NOW()
    WHERE id = $1 AND deleted_at IS NULL
";

// Attempts whose predecessor is at or before $3 start a fresh count.
const CLAIM_LOGIN_ATTEMPT: &str = r"
    UPDATE accounts
    SET failed_login_attempts = CASE
            WHEN last_login_attempt IS NULL OR last_login_attempt <= $3 THEN 1
            ELSE failed_login_attempts + 1
        END,
        last_login_attempt = $2, updated_at = NOW()
    WHERE id = $1 AND deleted_at IS NULL
        AND ($4 <= 0 OR failed_login_attempts < $4
            OR last_login_attempt IS NULL OR last_login_attempt <= $3)
    RETURNING failed_login_attempts
";

const SWAP_REFRESH: &str = r"
    UPDATE accounts
    SET refresh_token_hash = $3, updated_at = NOW()
    WHERE id = $1 AND refresh_token_hash = $2 AND deleted_at IS NULL
";

const CLEAR_REFRESH: &str = r"
    UPDATE accounts
    SET refresh_token_hash = NULL, updated_at = NOW()
    WHERE id = $1 AND deleted_at IS NULL
";

const REVOKE_REFRESH: &str = r"
    UPDATE accounts
    SET refresh_token_hash = NULL, updated_at = NOW()
    WHERE refresh_token_hash = $1 AND deleted_at IS NULL
    RETURNING id
";

const SET_RESET: &str = r"
    UPDATE accounts
    SET reset_token_hash = $2, reset_token_expires_at = $3, updated_at = NOW()
    WHERE id = $1 AND deleted_at IS NULL
";

const CONSUME_RESET: &str = r"
    UPDATE accounts
    SET password_hash = $3, reset_token_hash = NULL, reset_token_expires_at = NULL,
        refresh_token_hash = NULL, updated_at = NOW()
    WHERE reset_token_hash = $1 AND reset_token_expires_at > $2 AND deleted_at IS NULL
    RETURNING id
";

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn insert(&self, account: NewAccount) -> Result<AccountRecord, StoreError> {
        let row = self
            .bounded(
                "INSERT",
                INSERT_ACCOUNT,
                sqlx::query(INSERT_ACCOUNT)
                    .bind(&account.email)
                    .bind(&account.first_name)
                    .bind(&account.last_name)
                    .bind(&account.password_hash)
                    .bind(account.role.as_str())
                    .fetch_one(&self.pool),
            )
            .await?;
        account_from_row(&row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        let row = self
            .bounded(
                "SELECT",
                SELECT_BY_ID,
                sqlx::query(SELECT_BY_ID).bind(id).fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        let row = self
            .bounded(
                "SELECT",
                SELECT_BY_EMAIL,
                sqlx::query(SELECT_BY_EMAIL)
                    .bind(email)
                    .fetch_optional(&self.pool),
            )
            .await?;
        row.as_ref().map(account_from_row).transpose()
    }

    async fn record_login_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        refresh_hash: &[u8],
    ) -> Result<(), StoreError> {
        self.bounded(
            "UPDATE",
            LOGIN_SUCCESS,
            sqlx::query(LOGIN_SUCCESS)
                .bind(id)
                .bind(at)
                .bind(refresh_hash)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn claim_login_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<i32>, StoreError> {
        let row = self
            .bounded(
                "UPDATE",
                CLAIM_LOGIN_ATTEMPT,
                sqlx::query(CLAIM_LOGIN_ATTEMPT)
                    .bind(id)
                    .bind(at)
                    .bind(window_start)
                    .bind(max_attempts)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row
            .map(|row| row.try_get("failed_login_attempts"))
            .transpose()?)
    }

    async fn swap_refresh_hash(
        &self,
        id: Uuid,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                "UPDATE",
                SWAP_REFRESH,
                sqlx::query(SWAP_REFRESH)
                    .bind(id)
                    .bind(expected)
                    .bind(new)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_refresh_hash(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = self
            .bounded(
                "UPDATE",
                CLEAR_REFRESH,
                sqlx::query(CLEAR_REFRESH).bind(id).execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_refresh_hash(&self, hash: &[u8]) -> Result<Option<Uuid>, StoreError> {
        let row = self
            .bounded(
                "UPDATE",
                REVOKE_REFRESH,
                sqlx::query(REVOKE_REFRESH)
                    .bind(hash)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|row| row.try_get("id")).transpose()?)
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.bounded(
            "UPDATE",
            SET_RESET,
            sqlx::query(SET_RESET)
                .bind(id)
                .bind(hash)
                .bind(expires_at)
                .execute(&self.pool),
        )
        .await?;
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let row = self
            .bounded(
                "UPDATE",
                CONSUME_RESET,
                sqlx::query(CONSUME_RESET)
                    .bind(hash)
                    .bind(now)
                    .bind(password_hash)
                    .fetch_optional(&self.pool),
            )
            .await?;
        Ok(row.map(|row| row.try_get("id")).transpose()?)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(
            "SELECT",
            "SELECT 1",
            sqlx::query("SELECT 1").execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
