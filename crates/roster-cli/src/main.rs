//! CLI entry point for the roster directory.
//!
//! Holds one in-memory directory for the lifetime of the process:
//! reads JSON commands from stdin (or `--script`), writes one JSON
//! response per line to stdout.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use roster_cli::Session;
use roster_core::RosterConfig;
use roster_store::Directory;

#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "Scriptable in-memory directory of users and user groups")]
struct Cli {
    /// Config file prefix (default: roster).
    #[arg(short, long, default_value = "roster")]
    config: String,

    /// Read commands from this file instead of stdin.
    #[arg(long)]
    script: Option<PathBuf>,

    /// Stop at the first failed command and exit with status 1.
    #[arg(long)]
    fail_fast: bool,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if cli.json_logs {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    }

    let config = RosterConfig::load(&cli.config)?;
    tracing::info!(
        user_numeric_id_start = config.user_numeric_id_start,
        group_numeric_id_start = config.group_numeric_id_start,
        reject_nesting_cycles = config.reject_nesting_cycles,
        "Directory ready"
    );

    let input: Box<dyn BufRead> = match &cli.script {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening script {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let mut session = Session::new(Directory::new(&config));
    let mut stdout = io::stdout().lock();
    let summary = session.run(input, &mut stdout, cli.fail_fast).await?;

    tracing::info!(
        executed = summary.executed,
        failed = summary.failed,
        "Script finished"
    );

    if summary.stopped_early {
        std::process::exit(1);
    }
    Ok(())
}
