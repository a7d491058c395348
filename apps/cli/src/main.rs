//! stixfeed CLI: pulls a STIX 2.0 threat-intel catalog over TAXII and emits
//! enriched indicator and report entities.

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
