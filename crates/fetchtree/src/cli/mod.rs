use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fetchtree_core::{Factory, FetchConfig, Node};

pub mod get;
pub mod probe;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "fetchtree",
    version = env!("CARGO_PKG_VERSION"),
    about,
    long_about = None,
    propagate_version = true
)]
pub struct App {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "g", name = "get", about = "Download the first source that succeeds")]
    Get(get::GetArg),
    #[command(alias = "p", name = "probe", about = "Resolve size and metadata only")]
    Probe(probe::ProbeArg),
}

/// Flags shared by every command that builds a download tree.
#[derive(Clone, Debug, clap::Args)]
pub struct TreeArg {
    /// URLs or local paths; more than one become alternatives
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Attempts of the whole tree before giving up
    #[arg(long, default_value_t = 1)]
    pub retries: usize,

    /// Per-attempt timeout in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Alternatives to try before giving up; all of them by default
    #[arg(long = "max-tries")]
    pub max_tries: Option<usize>,

    /// Try alternatives in a random order
    #[arg(long)]
    pub random: bool,

    /// Follow HTML meta refresh pages to the real file
    #[arg(long = "meta-refresh")]
    pub meta_refresh: bool,

    /// TOML file with transport settings
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl TreeArg {
    pub fn factory(&self) -> Result<Factory> {
        let config = match &self.config {
            Some(path) => FetchConfig::load(path)?,
            None => FetchConfig::default(),
        };
        Ok(Factory::from_config(config)?)
    }

    /// Leaves, optionally behind meta refresh, then alternate, timeout and retry.
    pub fn build(&self, factory: &Factory) -> Result<Node> {
        let mut leaves = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let leaf = if source.contains("://") || source.starts_with("magnet:") {
                factory.url(source).with_context(|| format!("bad source '{source}'"))?
            } else {
                factory.file(source)
            };
            if self.meta_refresh {
                leaves.push(factory.meta_refresh(leaf)?);
            } else {
                leaves.push(leaf);
            }
        }

        let mut tree = match leaves.len() {
            1 => leaves.remove(0),
            _ => factory.alternate(leaves, self.max_tries, self.random)?,
        };
        if let Some(ms) = self.timeout_ms {
            tree = factory.timeout(tree, Duration::from_millis(ms))?;
        }
        if self.retries > 1 {
            tree = factory.retry(tree, self.retries)?;
        }
        Ok(tree)
    }
}
