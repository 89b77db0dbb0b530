use crate::cli::{
    actions::{server::Args, Action},
    commands::{auth, store},
};
use anyhow::Result;

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    Ok(Action::Server(Args {
        port,
        store: store::Options::parse(matches)?,
        auth: auth::Options::parse(matches)?,
    }))
}
