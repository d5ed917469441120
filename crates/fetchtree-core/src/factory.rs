//! The only supported way to build download trees.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::data::FetchConfig;
use crate::engine::TorrentEngine;
use crate::error::{FetchError, Result};
use crate::node::{
    AlternateKind, Context, DelayedFactory, DelayedKind, LeafOptions, MetaRefreshKind, Node,
    NodeKind, RetryKind, TimeoutKind, TorrentKind,
};
use crate::transport::{DefaultTransport, Target, Transport};

/// Builds leaves and wraps them in decorators.
///
/// Every node built here shares the factory's runtime handle, transport,
/// torrent engine and [`FetchConfig`].
///
/// ```no_run
/// # async fn demo() -> fetchtree_core::Result<()> {
/// use fetchtree_core::{Factory, FetchConfig};
///
/// let factory = Factory::from_config(FetchConfig::default())?;
/// let mirrors = vec![
///     factory.url("https://a.example/pkg.tar.gz")?,
///     factory.url("https://b.example/pkg.tar.gz")?,
/// ];
/// let tree = factory.retry(factory.alternate(mirrors, None, true)?, 3)?;
/// let resource = tree.download().await?;
/// # let _ = resource;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Factory {
    ctx: Arc<Context>,
}

impl Factory {
    /// Uses the ambient tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| FetchError::Config(format!("no tokio runtime: {e}")))?;
        Ok(Self::with_runtime(runtime, transport))
    }

    pub fn with_runtime(runtime: Handle, transport: Arc<dyn Transport>) -> Self {
        Self {
            ctx: Arc::new(Context {
                runtime,
                transport,
                engine: None,
                config: FetchConfig::default(),
            }),
        }
    }

    /// A factory over [`DefaultTransport`] built from `config`.
    pub fn from_config(config: FetchConfig) -> Result<Self> {
        let transport = Arc::new(DefaultTransport::new(&config)?);
        Ok(Self::new(transport)?.with_config(config))
    }

    pub fn with_engine(mut self, engine: Arc<dyn TorrentEngine>) -> Self {
        Arc::make_mut(&mut self.ctx).engine = Some(engine);
        self
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        Arc::make_mut(&mut self.ctx).config = config;
        self
    }

    pub fn config(&self) -> &FetchConfig { &self.ctx.config }

    pub fn url(&self, url: &str) -> Result<Node> { self.url_with(url, LeafOptions::default()) }

    pub fn url_with(&self, url: &str, options: LeafOptions) -> Result<Node> {
        Ok(self.ctx.leaf(Target::parse_url(url)?, options))
    }

    pub fn file(&self, path: impl Into<PathBuf>) -> Node {
        self.ctx.leaf(Target::File(path.into()), LeafOptions::default())
    }

    /// At most `max_attempts` forks of `child`; zero is treated as one.
    pub fn retry(&self, child: Node, max_attempts: usize) -> Result<Node> {
        self.compose(RetryKind::new(child, max_attempts))
    }

    pub fn timeout(&self, child: Node, timeout: Duration) -> Result<Node> {
        self.compose(TimeoutKind::new(child, timeout))
    }

    /// Tries `children` in order, or in one random order drawn now.
    ///
    /// `max_to_try` of `None` tries all of them; larger values are clamped.
    pub fn alternate(
        &self,
        children: Vec<Node>,
        max_to_try: Option<usize>,
        random: bool,
    ) -> Result<Node> {
        self.compose(AlternateKind::new(children, max_to_try, random))
    }

    pub fn delayed(&self, factory: impl DelayedFactory + 'static) -> Node {
        let kind = DelayedKind::new(Arc::new(factory));
        Node::from_kind(self.ctx.clone(), Box::new(kind), Default::default())
    }

    pub fn meta_refresh(&self, child: Node) -> Result<Node> {
        self.compose(MetaRefreshKind::new(child))
    }

    /// Treats `child`'s bytes as a `.torrent` and downloads its payload.
    ///
    /// With `persistent` the result is the file the engine keeps in
    /// `directory`; otherwise the payload is read into memory and the
    /// download is removed from the engine.
    pub fn torrent(
        &self,
        child: Node,
        persistent: bool,
        directory: impl AsRef<Path>,
    ) -> Result<Node> {
        let directory = directory.as_ref().to_path_buf();
        self.compose(TorrentKind::new(child, persistent, directory))
    }

    /// Wraps `child` in [`torrent`](Factory::torrent) when its name ends in `.torrent`.
    pub fn suffix_based(
        &self,
        child: Node,
        persistent: bool,
        directory: impl AsRef<Path>,
    ) -> Result<Node> {
        if child.name().to_ascii_lowercase().ends_with(".torrent") {
            self.torrent(child, persistent, directory)
        } else {
            Ok(child)
        }
    }

    fn compose<K: NodeKind + 'static>(&self, kind: K) -> Result<Node> {
        Node::compose(self.ctx.clone(), Box::new(kind))
    }
}
