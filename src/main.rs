//! `xenctl`: command-line client for XenServer / XCP-ng pools.

mod cli;
mod commands;
mod output;
mod prompt;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::Cli;

/// Logs go to stderr so that table and JSON output stay clean on stdout.
/// `RUST_LOG` overrides the verbosity flag.
fn init_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "xenctl={level},xenctl_xapi={level},xenctl_ssh={level}"
        ))
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(verbose > 1))
        .try_init()?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("xenctl: cannot initialise logging: {e}");
    }

    if let Err(e) = commands::run(cli).await {
        eprintln!("xenctl: {e:#}");
        std::process::exit(1);
    }
}
