//! fieldwarden - field-level access control for user records.
//!
//! Each subcommand prints a JSON document on stdout. Logs go to stderr.

mod commands;
mod config;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Args;
use error::Error;

fn main() {
    let (config, command) = Args::parse().into_config();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        policy = ?config.policy_path,
        audit_sink = ?config.audit_sink,
        audit_path = %config.audit_path.display(),
        "configuration loaded"
    );

    let result = commands::execute(&config, command)
        .and_then(|output| serde_json::to_string_pretty(&output).map_err(Error::from));

    match result {
        Ok(text) => println!("{}", text),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
