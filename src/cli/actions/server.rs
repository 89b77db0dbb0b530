use crate::{
    api,
    auth::{AuthService, PgCredentialStore, TokenCodec},
    cli::{
        commands::{auth, store},
        telemetry,
    },
};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub store: store::Options,
    pub auth: auth::Options,
}

/// Wire the store, hasher and token codecs, then serve until shutdown.
///
/// # Errors
/// Returns an error if the database is unreachable, a secret is rejected, or
/// the server fails.
pub async fn execute(args: Args) -> Result<()> {
    let store = PgCredentialStore::connect(
        &args.store.dsn,
        args.store.max_connections,
        args.store.timeout,
    )
    .await?;

    let hasher = args.auth.password_hasher()?;
    let access = TokenCodec::new(args.auth.access_token_secret.clone())
        .context("Invalid access token secret")?;
    let refresh = TokenCodec::new(args.auth.refresh_token_secret.clone())
        .context("Invalid refresh token secret")?;

    let service = AuthService::new(
        Arc::new(store),
        hasher,
        access,
        refresh,
        args.auth.auth_config(),
    );

    info!(
        port = args.port,
        hash_workers = args.auth.hash_workers,
        "Starting authgate"
    );

    let result = api::new(args.port, Arc::new(service)).await;
    telemetry::shutdown_tracer();
    result
}
