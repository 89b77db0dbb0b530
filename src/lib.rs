//! # authgate
//!
//! Credential verification and session token lifecycle for a web backend.
//!
//! ## Sessions
//!
//! A login yields a short-lived access token (JSON body, sent back as a bearer
//! header) and a long-lived refresh token (an `HttpOnly; SameSite=Strict`
//! cookie). Only a SHA-256 hash of the current refresh token is stored, one
//! per account. Every refresh rotates it; presenting a superseded token
//! revokes the session. Sessions also carry an absolute expiry fixed at login
//! that refresh never extends.
//!
//! ## Authorization
//!
//! Gated routes run a session guard that verifies the access token without
//! touching the store, then an optional role gate (`admin` or `manager`) or
//! ownership gate (admins bypass).
//!
//! ## Layout
//!
//! - [`auth`]: the transport-free core.
//! - [`api`]: the axum boundary.
//! - [`client`]: a reqwest client with a bounded refresh-and-retry policy.
//! - [`cli`]: argument parsing, telemetry and the server action.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
