//! Credential persistence.
//!
//! [`CredentialStore`] is the narrow interface the auth core talks to. Every
//! mutation that must be atomic per account (refresh rotation, revocation by
//! token, reset-token consumption) is a single conditional operation here, so
//! the service never does a read-then-write on security state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already in use")]
    DuplicateEmail,
    #[error("credential store timed out")]
    Timeout,
    #[error("invalid stored value: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Manager,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            other => Err(StoreError::Corrupt(format!("unknown role: {other}"))),
        }
    }
}

/// Full credential record. Only the auth core sees this type.
#[derive(Clone)]
pub struct AccountRecord {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub refresh_token_hash: Option<Vec<u8>>,
    pub reset_token_hash: Option<Vec<u8>>,
    pub reset_token_expires_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: i32,
    pub last_login_attempt: Option<DateTime<Utc>>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("has_session", &self.refresh_token_hash.is_some())
            .field("failed_login_attempts", &self.failed_login_attempts)
            .finish_non_exhaustive()
    }
}

/// Public view of an account, safe to serialize outward.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub role: Role,
    pub failed_login_attempts: i32,
    pub last_login_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&AccountRecord> for Account {
    fn from(record: &AccountRecord) -> Self {
        Self {
            id: record.id,
            email: record.email.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            role: record.role,
            failed_login_attempts: record.failed_login_attempts,
            last_login_attempt: record.last_login_attempt,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create a record with no session, no reset token and zero failed attempts.
    async fn insert(&self, account: NewAccount) -> Result<AccountRecord, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError>;

    /// Reset the failure counter, stamp the attempt and install a new refresh hash.
    async fn record_login_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        refresh_hash: &[u8],
    ) -> Result<(), StoreError>;

    /// Claim one login attempt before the password is checked.
    ///
    /// A counter whose last attempt is at or before `window_start` counts as
    /// zero. Returns the claimed attempt number, or `None` when `max_attempts`
    /// attempts already sit inside the window (or the account is gone). A
    /// `max_attempts` of zero disables the lock.
    async fn claim_login_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<i32>, StoreError>;

    /// Replace the refresh hash only if it still equals `expected`.
    ///
    /// Returns `false` when another caller already rotated or revoked it.
    async fn swap_refresh_hash(
        &self,
        id: Uuid,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StoreError>;

    /// Clear the refresh hash unconditionally. Returns `false` if the account does not exist.
    async fn clear_refresh_hash(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Clear the refresh hash of whichever account currently holds `hash`.
    async fn revoke_refresh_hash(&self, hash: &[u8]) -> Result<Option<Uuid>, StoreError>;

    async fn set_reset_token(
        &self,
        id: Uuid,
        hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Single-use consumption: if an account holds `hash` and it has not expired at
    /// `now`, set `password_hash`, clear both reset fields and the refresh hash.
    async fn consume_reset_token(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process store. Backs tests and local runs without a database.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<Uuid, AccountRecord>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change an account role. Roles are never chosen at signup, so this is how
    /// tests and seed tooling create admins.
    pub fn set_role(&self, id: Uuid, role: Role) -> bool {
        self.lock().get_mut(&id).map(|record| record.role = role).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, AccountRecord>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn insert(&self, account: NewAccount) -> Result<AccountRecord, StoreError> {
        let mut accounts = self.lock();
        if accounts.values().any(|record| record.email == account.email) {
            return Err(StoreError::DuplicateEmail);
        }
        let record = AccountRecord {
            id: Uuid::new_v4(),
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            password_hash: account.password_hash,
            refresh_token_hash: None,
            reset_token_hash: None,
            reset_token_expires_at: None,
            failed_login_attempts: 0,
            last_login_attempt: None,
            role: account.role,
            created_at: Utc::now(),
        };
        accounts.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        Ok(self
            .lock()
            .values()
            .find(|record| record.email == email)
            .cloned())
    }

    async fn record_login_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        refresh_hash: &[u8],
    ) -> Result<(), StoreError> {
        if let Some(record) = self.lock().get_mut(&id) {
            record.failed_login_attempts = 0;
            record.last_login_attempt = Some(at);
            record.refresh_token_hash = Some(refresh_hash.to_vec());
        }
        Ok(())
    }

    async fn claim_login_attempt(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        window_start: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<Option<i32>, StoreError> {
        let mut accounts = self.lock();
        let Some(record) = accounts.get_mut(&id) else {
            return Ok(None);
        };
        let lapsed = record
            .last_login_attempt
            .map_or(true, |last| last <= window_start);
        let current = if lapsed { 0 } else { record.failed_login_attempts };
        if max_attempts > 0 && current >= max_attempts {
            return Ok(None);
        }
        record.failed_login_attempts = current.saturating_add(1);
        record.last_login_attempt = Some(at);
        Ok(Some(record.failed_login_attempts))
    }

    async fn swap_refresh_hash(
        &self,
        id: Uuid,
        expected: &[u8],
        new: &[u8],
    ) -> Result<bool, StoreError> {
        let mut accounts = self.lock();
        match accounts.get_mut(&id) {
            Some(record) if record.refresh_token_hash.as_deref() == Some(expected) => {
                record.refresh_token_hash = Some(new.to_vec());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_refresh_hash(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .lock()
            .get_mut(&id)
            .map(|record| record.refresh_token_hash = None)
            .is_some())
    }

    async fn revoke_refresh_hash(&self, hash: &[u8]) -> Result<Option<Uuid>, StoreError> {
        let mut accounts = self.lock();
        Ok(accounts
            .values_mut()
            .find(|record| record.refresh_token_hash.as_deref() == Some(hash))
            .map(|record| {
                record.refresh_token_hash = None;
                record.id
            }))
    }

    async fn set_reset_token(
        &self,
        id: Uuid,
        hash: &[u8],
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.lock().get_mut(&id) {
            record.reset_token_hash = Some(hash.to_vec());
            record.reset_token_expires_at = Some(expires_at);
        }
        Ok(())
    }

    async fn consume_reset_token(
        &self,
        hash: &[u8],
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let mut accounts = self.lock();
        Ok(accounts
            .values_mut()
            .find(|record| {
                record.reset_token_hash.as_deref() == Some(hash)
                    && record.reset_token_expires_at.is_some_and(|exp| exp > now)
            })
            .map(|record| {
                record.password_hash = password_hash.to_string();
                record.reset_token_hash = None;
                record.reset_token_expires_at = None;
                record.refresh_token_hash = None;
                record.id
            }))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
