//! Password hashing and verification using Argon2id.
//!
//! Hashing is CPU and memory heavy on purpose. Work runs on tokio's blocking
//! pool behind a semaphore, so at most `workers` hashes are in flight and
//! request handling on the async workers is never stalled by a login storm.

use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use secrecy::{ExposeSecret, SecretString};
use std::{num::NonZeroUsize, sync::Arc};
use thiserror::Error;
use tokio::sync::{OnceCell, Semaphore};
use tracing::warn;

// Plaintext used to build the timing-equalization hash for unknown accounts.
const DUMMY_PASSWORD: &str = "authgate-timing-equalizer-0";

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
    #[error("hashing worker failed: {0}")]
    Worker(String),
}

/// Argon2id hasher with a bounded worker pool.
#[derive(Clone)]
pub struct PasswordHasher {
    params: Params,
    permits: Arc<Semaphore>,
    dummy_hash: Arc<OnceCell<String>>,
}

impl std::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .field("p_cost", &self.params.p_cost())
            .field("available_workers", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    /// Build a hasher with explicit cost parameters.
    ///
    /// # Errors
    /// Returns an error if the Argon2 parameters are out of range.
    pub fn new(
        memory_kib: u32,
        iterations: u32,
        parallelism: u32,
        workers: usize,
    ) -> Result<Self, PasswordError> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|err| PasswordError::Params(err.to_string()))?;
        Ok(Self {
            params,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            dummy_hash: Arc::new(OnceCell::new()),
        })
    }

    /// Default worker count: one per available CPU.
    #[must_use]
    pub fn default_workers() -> usize {
        std::thread::available_parallelism().map_or(4, NonZeroUsize::get)
    }

    /// Hash a plaintext password into a PHC string (salted, so never deterministic).
    ///
    /// # Errors
    /// Returns an error if hashing fails or the worker task panics.
    pub async fn hash(&self, plaintext: SecretString) -> Result<String, PasswordError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|err| PasswordError::Worker(err.to_string()))?;
        let params = self.params.clone();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let salt = SaltString::generate(&mut OsRng);
            Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
                .hash_password(plaintext.expose_secret().as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|err| PasswordError::Hash(err.to_string()))
        })
        .await
        .map_err(|err| PasswordError::Worker(err.to_string()))?
    }

    /// Verify a plaintext password against a stored PHC string.
    ///
    /// A malformed stored hash or a failed worker counts as a mismatch.
    pub async fn verify(&self, plaintext: SecretString, stored: String) -> bool {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            return false;
        };

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let parsed = match PasswordHash::new(&stored) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("Stored password hash is malformed: {err}");
                    return false;
                }
            };
            // Cost parameters are read from the PHC string, not from `self`.
            Argon2::default()
                .verify_password(plaintext.expose_secret().as_bytes(), &parsed)
                .is_ok()
        })
        .await;

        result.unwrap_or_else(|err| {
            warn!("Password verification worker failed: {err}");
            false
        })
    }

    /// Spend the same effort as a real verification and return `false`.
    ///
    /// Used when the account does not exist so response time does not reveal it.
    pub async fn verify_dummy(&self, plaintext: SecretString) -> bool {
        let dummy = self
            .dummy_hash
            .get_or_try_init(|| self.hash(SecretString::from(DUMMY_PASSWORD.to_string())))
            .await;
        match dummy {
            Ok(dummy) => {
                let _ = self.verify(plaintext, dummy.clone()).await;
            }
            Err(err) => warn!("Failed to build timing-equalization hash: {err}"),
        }
        false
    }
}
