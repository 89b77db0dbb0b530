use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

use crate::auth::{config::MAX_LIFETIME_SECONDS, AuthConfig, PasswordHasher};

const MIN_SECRET_BYTES: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_session_args(command);
    let command = with_hashing_args(command);
    with_http_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("access-token-secret")
                .long("access-token-secret")
                .help("HMAC key for access tokens (at least 32 bytes)")
                .env("AUTHGATE_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("refresh-token-secret")
                .long("refresh-token-secret")
                .help("HMAC key for refresh tokens (at least 32 bytes, distinct from the access key)")
                .env("AUTHGATE_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("access-token-ttl-seconds")
                .long("access-token-ttl-seconds")
                .help("Access token TTL in seconds")
                .env("AUTHGATE_ACCESS_TOKEN_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new("refresh-token-ttl-seconds")
                .long("refresh-token-ttl-seconds")
                .help("Refresh token TTL in seconds")
                .env("AUTHGATE_REFRESH_TOKEN_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("session-max-age-seconds")
                .long("session-max-age-seconds")
                .help("Absolute session lifetime in seconds, not extended by refresh")
                .env("AUTHGATE_SESSION_MAX_AGE_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("AUTHGATE_RESET_TOKEN_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new("max-failed-logins")
                .long("max-failed-logins")
                .help("Failed logins within the lockout window before an account is locked")
                .env("AUTHGATE_MAX_FAILED_LOGINS")
                .default_value("5")
                .value_parser(clap::value_parser!(i32).range(1..)),
        )
        .arg(
            Arg::new("lockout-seconds")
                .long("lockout-seconds")
                .help("Lockout window in seconds")
                .env("AUTHGATE_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
}

fn with_hashing_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("argon2-memory-kib")
                .long("argon2-memory-kib")
                .help("Argon2id memory cost in KiB")
                .env("AUTHGATE_ARGON2_MEMORY_KIB")
                .default_value("19456")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("argon2-iterations")
                .long("argon2-iterations")
                .help("Argon2id iterations")
                .env("AUTHGATE_ARGON2_ITERATIONS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("argon2-parallelism")
                .long("argon2-parallelism")
                .help("Argon2id lanes")
                .env("AUTHGATE_ARGON2_PARALLELISM")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("hash-workers")
                .long("hash-workers")
                .help("Concurrent password hashing jobs (default: CPU count)")
                .env("AUTHGATE_HASH_WORKERS")
                .value_parser(clap::value_parser!(usize)),
        )
}

fn with_http_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("cookie-insecure")
                .long("cookie-insecure")
                .help("Drop the Secure attribute from the refresh cookie (plain HTTP development only)")
                .env("AUTHGATE_COOKIE_INSECURE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for CORS and password reset links")
                .env("AUTHGATE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub session_max_age_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub max_failed_logins: i32,
    pub lockout_seconds: i64,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
    pub argon2_parallelism: u32,
    pub hash_workers: usize,
    pub cookie_insecure: bool,
    pub frontend_base_url: String,
}

impl Options {
    /// # Errors
    /// Returns an error if a secret is missing, too short, or both secrets are equal.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let access_token_secret = secret(matches, "access-token-secret")?;
        let refresh_token_secret = secret(matches, "refresh-token-secret")?;
        if access_token_secret.expose_secret() == refresh_token_secret.expose_secret() {
            bail!("access and refresh token secrets must differ");
        }

        Ok(Self {
            access_token_secret,
            refresh_token_secret,
            access_token_ttl_seconds: get(matches, "access-token-ttl-seconds", 900),
            refresh_token_ttl_seconds: get(matches, "refresh-token-ttl-seconds", 604_800),
            session_max_age_seconds: get(matches, "session-max-age-seconds", 604_800),
            reset_token_ttl_seconds: get(matches, "reset-token-ttl-seconds", 86_400),
            max_failed_logins: get(matches, "max-failed-logins", 5),
            lockout_seconds: get(matches, "lockout-seconds", 900),
            argon2_memory_kib: get(matches, "argon2-memory-kib", 19_456),
            argon2_iterations: get(matches, "argon2-iterations", 2),
            argon2_parallelism: get(matches, "argon2-parallelism", 1),
            hash_workers: matches
                .get_one::<usize>("hash-workers")
                .copied()
                .unwrap_or_else(PasswordHasher::default_workers),
            cookie_insecure: matches.get_flag("cookie-insecure"),
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        })
    }

    #[must_use]
    pub fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.frontend_base_url.clone())
            .with_access_token_ttl_seconds(self.access_token_ttl_seconds)
            .with_refresh_token_ttl_seconds(self.refresh_token_ttl_seconds)
            .with_session_max_age_seconds(self.session_max_age_seconds)
            .with_reset_token_ttl_seconds(self.reset_token_ttl_seconds)
            .with_max_failed_logins(self.max_failed_logins)
            .with_lockout_seconds(self.lockout_seconds)
            .with_cookie_secure(!self.cookie_insecure)
    }

    /// # Errors
    /// Returns an error if the Argon2 parameters are out of range.
    pub fn password_hasher(&self) -> Result<PasswordHasher> {
        PasswordHasher::new(
            self.argon2_memory_kib,
            self.argon2_iterations,
            self.argon2_parallelism,
            self.hash_workers,
        )
        .context("Invalid Argon2 parameters")
    }
}

fn secret(matches: &ArgMatches, name: &str) -> Result<SecretString> {
    let value = matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))?;
    if value.len() < MIN_SECRET_BYTES {
        bail!("--{name} must be at least {MIN_SECRET_BYTES} bytes");
    }
    Ok(SecretString::from(value))
}

fn get<T: Copy + Send + Sync + 'static>(matches: &ArgMatches, name: &str, default: T) -> T {
    matches.get_one::<T>(name).copied().unwrap_or(default)
}
