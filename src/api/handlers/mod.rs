//! Route handlers. Each one decodes its payload, calls [`crate::auth::AuthService`]
//! and lets [`crate::auth::ServiceError`] map itself to a response.

pub mod health;
pub mod login;
pub mod password_reset;
pub mod session;
pub mod signup;
pub mod types;
pub mod users;
