use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use super::TreeArg;
use crate::ui::ProgressTracker;

#[derive(Clone, Debug, clap::Args)]
pub struct GetArg {
    #[command(flatten)]
    pub tree: TreeArg,

    /// Where to write the result; defaults to the last segment of the first source
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl GetArg {
    pub async fn run(self) -> Result<()> {
        let factory = self.tree.factory()?;
        let tree = self.tree.build(&factory)?;
        let output = match &self.output {
            Some(path) => path.clone(),
            None => default_output(&self.tree.sources[0]),
        };

        let tracker = Arc::new(ProgressTracker::new());
        tree.add_listener(tracker.clone());
        let resource = tree
            .download()
            .await
            .with_context(|| format!("failed to download {}", tree.name()))?;

        let written = resource
            .write_to(&output)
            .await
            .with_context(|| format!("failed to write {}", output.display()))?;
        tracker.finish(Some(format!("{written} bytes")));
        info!(output = %output.display(), bytes = written, "Saved");
        Ok(())
    }
}

fn default_output(source: &str) -> PathBuf {
    let trimmed = source.split(['?', '#']).next().unwrap_or(source);
    let path = match trimmed.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => trimmed,
    };
    let name = Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && !n.contains(':'));
    PathBuf::from(name.unwrap_or("download.bin"))
}
