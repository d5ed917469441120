use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FetchError, Result};

/// Settings shared by every node a [`Factory`](crate::Factory) builds.
///
/// Loaded once and injected at factory construction; nodes never consult
/// process-global state.
///
/// ```
/// use fetchtree_core::FetchConfig;
///
/// let config = FetchConfig::from_toml_str(r#"
///     user_agent = "fetchtree/0.1"
///     max_in_memory_bytes = 1048576
/// "#).unwrap();
/// assert_eq!(config.max_in_memory_bytes, 1 << 20);
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchConfig {
    /// Seeds the `url_user-agent` request property on every leaf.
    pub user_agent: Option<String>,

    /// Bodies larger than this are spooled to a temporary file.
    ///
    /// Default: 8 MiB
    pub max_in_memory_bytes: u64,

    /// How often a torrent node reports percent-complete while the engine works.
    ///
    /// Default: 1000ms
    pub torrent_progress_interval_ms: u64,

    /// Proxy URL handed to the HTTP transport.
    pub proxy: Option<String>,

    /// Connect timeout for the HTTP transport.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent:                   None,
            max_in_memory_bytes:          8 * 1024 * 1024,
            torrent_progress_interval_ms: 1000,
            proxy:                        None,
            connect_timeout_ms:           None,
        }
    }
}

impl FetchConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FetchError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FetchError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn torrent_progress_interval(&self) -> Duration {
        Duration::from_millis(self.torrent_progress_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }
}
