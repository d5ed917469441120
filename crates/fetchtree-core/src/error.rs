//! Error types for fetchtree-core.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Terminal failure of a node.
///
/// Cloneable because a node replays its single terminal failure to every
/// listener, including those registered after the fact.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("download cancelled")]
    Cancelled,

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error for {target}: {message}")]
    Transport { target: String, message: String },

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("downloaded but rejected by listener")]
    Rejected,

    #[error("gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: usize,
        last:     Box<FetchError>,
    },

    #[error("0 alternatives")]
    NoAlternatives,

    #[error("download already initiated")]
    AlreadyStarted,

    #[error("invalid download tree: {0}")]
    InvalidTree(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("refresh tag not found and stream not recoverable")]
    RefreshNotRecoverable,

    #[error("download did not complete")]
    Incomplete,

    #[error("torrent engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FetchError {
    pub fn transport(target: impl ToString, message: impl ToString) -> Self {
        Self::Transport {
            target:  target.to_string(),
            message: message.to_string(),
        }
    }

    pub fn exhausted(attempts: usize, last: FetchError) -> Self {
        Self::Exhausted {
            attempts,
            last: Box::new(last),
        }
    }

    pub fn is_cancelled(&self) -> bool { matches!(self, FetchError::Cancelled) }

    pub fn is_timeout(&self) -> bool { matches!(self, FetchError::Timeout(_)) }

    /// Follows `Exhausted` wrappers down to the error that actually ended the last attempt.
    pub fn root_cause(&self) -> &FetchError {
        match self {
            FetchError::Exhausted { last, .. } => last.root_cause(),
            other => other,
        }
    }
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self { FetchError::Io(Arc::new(e)) }
}

pub type Result<T> = std::result::Result<T, FetchError>;
