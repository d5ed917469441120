use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::{Node, NodeKind};
use crate::core::{TorrentMeta, parse_torrent};
use crate::data::Resource;
use crate::engine::{EngineDownload, EngineState, Submission, TorrentEngine};
use crate::error::{FetchError, Result};
use crate::listener::Relay;

/// Descriptor slot shared by a torrent node and all of its forks.
type DescriptorSlot = Arc<tokio::sync::Mutex<Option<Arc<TorrentMeta>>>>;

/// Fetches a `.torrent` through its child, then waits for the engine to seed it.
pub(crate) struct TorrentKind {
    inner: Arc<Inner>,
}

struct Inner {
    child:      Node,
    persistent: bool,
    directory:  PathBuf,
    descriptor: DescriptorSlot,
    current:    Mutex<Option<Node>>,
    handed_off: AtomicBool,
}

impl TorrentKind {
    pub(crate) fn new(child: Node, persistent: bool, directory: PathBuf) -> Self {
        Self::with_slot(child, persistent, directory, Arc::default())
    }

    fn with_slot(
        child: Node,
        persistent: bool,
        directory: PathBuf,
        descriptor: DescriptorSlot,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                child,
                persistent,
                directory,
                descriptor,
                current: Mutex::new(None),
                handed_off: AtomicBool::new(false),
            }),
        }
    }
}

impl Inner {
    /// Fetches and parses the descriptor unless some fork already did.
    async fn descriptor(&self, node: Option<&Node>) -> Result<Arc<TorrentMeta>> {
        let mut slot = self.descriptor.lock().await;
        if let Some(meta) = slot.as_ref() {
            return Ok(meta.clone());
        }

        let fetch = self.child.fork(node);
        if let Some(node) = node {
            *self.current.lock() = Some(fetch.clone());
            if node.is_cancelled() {
                fetch.cancel();
            }
            fetch.add_listener(Arc::new(Relay::new(node)));
        }
        let bytes = fetch.download().await?.bytes().await?;
        let meta = Arc::new(parse_torrent(bytes)?);
        debug!(torrent = %meta.name, info_hash = %meta.info_hash, "Torrent descriptor parsed");
        *slot = Some(meta.clone());
        Ok(meta)
    }

    async fn run(&self, node: &Node) -> Result<Resource> {
        let meta = self.descriptor(Some(node)).await?;
        let engine = node
            .context()
            .engine
            .clone()
            .ok_or_else(|| FetchError::Engine("no torrent engine configured".into()))?;

        self.handed_off.store(true, Ordering::SeqCst);
        if node.is_terminal() {
            return Err(FetchError::Cancelled);
        }
        node.set_property("torrent-name", Value::from(meta.name.clone()));

        let download = self.submit(engine.as_ref(), &meta).await?;
        node.report_activity(&format!("Downloading torrent {}", meta.name));
        self.wait_for_seeding(node, download.as_ref()).await?;
        node.report_percent_complete(100);

        let path = download.data_path();
        if self.persistent {
            return Ok(Resource::from_file(path, Some(meta.length)));
        }
        let bytes = tokio::fs::read(&path).await?;
        if let Err(e) = engine.remove(&meta.info_hash).await {
            warn!(info_hash = %meta.info_hash, error = %e, "Failed to remove finished torrent");
        }
        Ok(Resource::from_bytes(bytes))
    }

    /// Reuses a live download registered under the same hash, replacing a dead one.
    async fn submit(
        &self,
        engine: &dyn TorrentEngine,
        meta: &TorrentMeta,
    ) -> Result<Arc<dyn EngineDownload>> {
        if let Some(existing) = engine.find(&meta.info_hash) {
            let state = *existing.subscribe().borrow();
            if !state.is_dead() {
                debug!(info_hash = %meta.info_hash, %state, "Reusing engine download");
                return Ok(existing);
            }
            debug!(info_hash = %meta.info_hash, %state, "Replacing dead engine download");
            engine.remove(&meta.info_hash).await?;
        }
        engine
            .submit(Submission {
                torrent:    meta.raw.clone(),
                info_hash:  meta.info_hash,
                persistent: self.persistent,
                directory:  &self.directory,
            })
            .await
    }

    async fn wait_for_seeding(&self, node: &Node, download: &dyn EngineDownload) -> Result<()> {
        let mut states = download.subscribe();
        let mut ticker = tokio::time::interval(node.context().config.torrent_progress_interval());
        let mut closed = false;

        loop {
            let state = *states.borrow_and_update();
            match state {
                EngineState::Seeding => return Ok(()),
                EngineState::Removed => return Err(FetchError::Incomplete),
                EngineState::Error => {
                    return Err(FetchError::Engine(format!(
                        "download {} entered the error state",
                        download.info_hash()
                    )));
                }
                EngineState::Queued | EngineState::Downloading | EngineState::Stopped => {}
            }
            if closed {
                return Err(FetchError::Incomplete);
            }

            tokio::select! {
                changed = states.changed() => closed = changed.is_err(),
                _ = ticker.tick() => node.report_percent_complete(download.percent_complete()),
            }
        }
    }
}

#[async_trait]
impl NodeKind for TorrentKind {
    fn name(&self) -> String { self.inner.child.name() }

    fn fork(&self) -> Box<dyn NodeKind> {
        let inner = &self.inner;
        Box::new(Self::with_slot(
            inner.child.fork(None),
            inner.persistent,
            inner.directory.clone(),
            inner.descriptor.clone(),
        ))
    }

    fn children(&self) -> Vec<Node> { vec![self.inner.child.clone()] }

    async fn resolve_size(&self, _node: &Node) -> Result<Option<u64>> {
        let meta = self.inner.descriptor(None).await?;
        Ok(Some(meta.length))
    }

    fn start(&self, node: &Node) {
        let inner = self.inner.clone();
        let task_node = node.clone();
        node.spawn(async move {
            match inner.run(&task_node).await {
                Ok(resource) => task_node.deliver(resource),
                Err(e) => task_node.inform_failed(e),
            }
        });
    }

    fn interrupt(&self) {
        let current = self.inner.current.lock().clone();
        if let Some(current) = current {
            current.cancel();
        }
    }

    /// Once the engine owns the download, cancelling this node does nothing.
    fn cancellable(&self) -> bool { !self.inner.handed_off.load(Ordering::SeqCst) }
}
