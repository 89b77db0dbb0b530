use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;
use std::time::Duration;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("dsn")
                .short('d')
                .long("dsn")
                .help("Database connection string")
                .env("AUTHGATE_DSN")
                .required(true),
        )
        .arg(
            Arg::new("store-timeout-ms")
                .long("store-timeout-ms")
                .help("Upper bound for every credential store query in milliseconds")
                .env("AUTHGATE_STORE_TIMEOUT_MS")
                .default_value("3000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("db-max-connections")
                .long("db-max-connections")
                .help("Maximum database pool size")
                .env("AUTHGATE_DB_MAX_CONNECTIONS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub dsn: SecretString,
    pub timeout: Duration,
    pub max_connections: u32,
}

impl Options {
    /// # Errors
    /// Returns an error if the DSN is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let dsn = matches
            .get_one::<String>("dsn")
            .cloned()
            .context("missing required argument: --dsn")?;
        Ok(Self {
            dsn: SecretString::from(dsn),
            timeout: Duration::from_millis(
                matches
                    .get_one::<u64>("store-timeout-ms")
                    .copied()
                    .unwrap_or(3000),
            ),
            max_connections: matches
                .get_one::<u32>("db-max-connections")
                .copied()
                .unwrap_or(5),
        })
    }
}
