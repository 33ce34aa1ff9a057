//! Prism - Supervisor dispatch for multimodal specialists
//!
//! CLI entry point.

#![forbid(unsafe_code)]

use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod cli;

const DEFAULT_LOG_FILTER: &str = "prism=info,prism_core=info,prism_specialists=info";

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so `stream` output stays machine-readable.
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    init_tracing(cli.json_logs);
    debug!("Starting Prism v{}", env!("CARGO_PKG_VERSION"));

    if let Err(error) = cli::run(cli).await {
        match error.downcast_ref::<prism_core::Error>() {
            Some(core) => eprint!("{}", prism_core::format_error_for_cli(core)),
            None => eprintln!("Error: {:#}", error),
        }
        std::process::exit(1);
    }
}
