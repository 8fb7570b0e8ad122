//! adgen CLI binary entry point.
//!
//! Initializes the tracing subscriber, parses command-line arguments with
//! clap, and dispatches to the selected subcommand via [`Cli::run`].

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (workdir, slug) = cli.log_context();

    // Best-effort, before tracing is initialized.
    logging::cleanup_old_logs(&workdir);

    let _guard = logging::init_tracing(&workdir, slug.as_deref())?;

    cli.run().await
}
