//! Transport abstraction consumed by leaf nodes.
//!
//! The node tree only needs three things from the outside world: open a
//! target and get a byte stream, report a size without downloading, and
//! hand back whatever metadata came along. Everything else (TLS, proxies,
//! redirects, compression) belongs to the implementation.

mod local;
#[cfg(feature = "reqwest")]
mod http;

use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::data::{FetchConfig, Properties};
use crate::error::{FetchError, Result};

pub use local::LocalTransport;
#[cfg(feature = "reqwest")]
pub use http::HttpTransport;

/// Chunked body produced by a transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// What a leaf points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Url(Url),
    File(PathBuf),
}

impl Target {
    pub fn parse_url(s: &str) -> Result<Self> {
        Url::parse(s)
            .map(Target::Url)
            .map_err(|e| FetchError::InvalidUrl(format!("{s}: {e}")))
    }

    /// Magnet links carry no size and are never probed.
    pub fn is_magnet(&self) -> bool {
        matches!(self, Target::Url(u) if u.scheme().eq_ignore_ascii_case("magnet"))
    }

    /// Local path for `File` targets and `file://` URLs.
    pub fn local_path(&self) -> Option<PathBuf> {
        match self {
            Target::File(p) => Some(p.clone()),
            Target::Url(u) if u.scheme() == "file" => u.to_file_path().ok(),
            Target::Url(_) => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Url(u) => write!(f, "{u}"),
            Target::File(p) => write!(f, "{}", p.display()),
        }
    }
}

/// One probe or fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub target:  Target,
    pub headers: Vec<(String, String)>,
}

impl Request {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            headers: Vec::new(),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }
}

/// Result of a size/metadata probe.
#[derive(Debug, Clone, Default)]
pub struct Probe {
    /// `None` when the target cannot report a size cheaply.
    pub size:       Option<u64>,
    pub properties: Properties,
}

/// An opened body.
pub struct Fetched {
    pub size:       Option<u64>,
    pub body:       ByteStream,
    pub properties: Properties,
}

impl fmt::Debug for Fetched {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fetched")
            .field("size", &self.size)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

/// Byte-level access to targets.
///
/// Implementations must return promptly with [`FetchError::Cancelled`] once
/// `cancel` fires, and should map protocol failures to
/// [`FetchError::Transport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn probe(&self, request: &Request, cancel: &CancellationToken) -> Result<Probe>;

    async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> Result<Fetched>;
}

/// Routes local targets to [`LocalTransport`] and `http(s)` to [`HttpTransport`].
pub struct DefaultTransport {
    local: LocalTransport,
    #[cfg(feature = "reqwest")]
    http:  HttpTransport,
}

impl DefaultTransport {
    #[cfg_attr(not(feature = "reqwest"), allow(unused_variables))]
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            local: LocalTransport::new(),
            #[cfg(feature = "reqwest")]
            http: HttpTransport::new(config)?,
        })
    }

    fn route(&self, target: &Target) -> Result<&dyn Transport> {
        if target.local_path().is_some() {
            return Ok(&self.local);
        }
        match target {
            #[cfg(feature = "reqwest")]
            Target::Url(u) if matches!(u.scheme(), "http" | "https") => Ok(&self.http),
            other => Err(FetchError::transport(other, "no transport for this scheme")),
        }
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn probe(&self, request: &Request, cancel: &CancellationToken) -> Result<Probe> {
        self.route(&request.target)?.probe(request, cancel).await
    }

    async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> Result<Fetched> {
        self.route(&request.target)?.fetch(request, cancel).await
    }
}
