//! Delivery of password reset links.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::info;

#[derive(Clone)]
pub struct ResetMessage {
    pub to_email: String,
    pub reset_url: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for ResetMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetMessage")
            .field("to_email", &self.to_email)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Reset delivery abstraction (SMTP, API, queue).
pub trait ResetMailer: Send + Sync {
    /// Deliver the link or return an error. Failures are logged, never surfaced
    /// to the requester.
    fn send(&self, message: &ResetMessage) -> Result<()>;
}

/// Local dev mailer that logs delivery metadata. The link itself is not logged.
#[derive(Clone, Debug)]
pub struct LogResetMailer;

impl ResetMailer for LogResetMailer {
    fn send(&self, message: &ResetMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            expires_at = %message.expires_at,
            "password reset send stub"
        );
        Ok(())
    }
}
