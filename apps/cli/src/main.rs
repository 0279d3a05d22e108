//! Larder CLI: bulk catalog import and enrichment.
//!
//! Loads recipe records from delimited files into a local catalog,
//! reconciles categories and duplicates by name, and completes missing
//! descriptions and steps with a generative service or offline synthesis.

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
