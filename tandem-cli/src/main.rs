//! Tandem operator tool.
//!
//! Talks to the same account store and callable functions the app uses, for
//! inspecting accounts and repairing entitlements by hand.
//!
//! Usage:
//!   tandem --store-url https://api.tandem.app/v1 account uid-1
//!   tandem --id-token $TOKEN grant uid-1 --plan annual
//!
//! Reports go to stdout as JSON; logs go to stderr.

use anyhow::Result;
use clap::Parser;
use tandem_cli::Args;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_ascii_lowercase()));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let report = tandem_cli::run(&args).await?;
    println!("{report}");
    Ok(())
}
