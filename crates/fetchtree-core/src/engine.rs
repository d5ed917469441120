//! Torrent download engine consumed by the torrent node.
//!
//! The engine owns the swarm. The node only submits a descriptor, watches
//! state transitions and reads the finished file from disk.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::core::InfoHash;
use crate::error::Result;

/// Lifecycle of a download inside the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Queued,
    Downloading,
    Seeding,
    Stopped,
    Error,
    /// The download was removed from the engine; terminal.
    Removed,
}

impl EngineState {
    /// States in which an existing download cannot be reused.
    pub fn is_dead(&self) -> bool {
        matches!(self, EngineState::Stopped | EngineState::Error | EngineState::Removed)
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Queued => "queued",
            EngineState::Downloading => "downloading",
            EngineState::Seeding => "seeding",
            EngineState::Stopped => "stopped",
            EngineState::Error => "error",
            EngineState::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// A single download registered with the engine.
pub trait EngineDownload: Send + Sync {
    fn info_hash(&self) -> InfoHash;

    /// Current state plus every later transition.
    fn subscribe(&self) -> watch::Receiver<EngineState>;

    fn percent_complete(&self) -> u8;

    /// Where the single data file lands once complete.
    fn data_path(&self) -> PathBuf;
}

/// Descriptor handed to [`TorrentEngine::submit`].
#[derive(Debug, Clone)]
pub struct Submission<'a> {
    /// Raw bencoded `.torrent` bytes.
    pub torrent:    Bytes,
    pub info_hash:  InfoHash,
    pub persistent: bool,
    pub directory:  &'a Path,
}

#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Looks up a download already registered under `hash`.
    fn find(&self, hash: &InfoHash) -> Option<Arc<dyn EngineDownload>>;

    async fn submit(&self, submission: Submission<'_>) -> Result<Arc<dyn EngineDownload>>;

    async fn remove(&self, hash: &InfoHash) -> Result<()>;
}
