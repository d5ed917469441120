use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{App, Commands};

mod cli;
mod ui;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match app.cmd {
        Commands::Get(arg) => arg.run().await,
        Commands::Probe(arg) => arg.run().await,
    }
}
