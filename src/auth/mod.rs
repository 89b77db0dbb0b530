//! Authentication core: password hashing, token codec, credential store and
//! the session lifecycle built on them. Nothing here depends on HTTP types.

pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod mailer;
pub mod password;
pub mod postgres;
pub mod service;
pub mod store;
pub mod token;
mod utils;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::{FieldError, ServiceError};
pub use guard::{authorize_owner, authorize_roles, Identity};
pub use mailer::{LogResetMailer, ResetMailer, ResetMessage};
pub use password::PasswordHasher;
pub use postgres::PgCredentialStore;
pub use service::{AuthService, LoginOutcome, SignupInput, TokenPair};
pub use store::{Account, CredentialStore, MemoryStore, Role};
pub use token::TokenCodec;
