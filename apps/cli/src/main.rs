//! extruder CLI — pulls field values out of the remote task-tracking
//! system for a spreadsheet of identifiers.
//!
//! With no subcommand the browser front end starts on localhost.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
