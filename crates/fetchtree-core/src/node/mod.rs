//! The download node tree.
//!
//! A [`Node`] is one single-use download attempt: a leaf that talks to the
//! transport, or a decorator that orchestrates forks of its children. Results
//! travel upward through [`Listener`] callbacks, never through return values,
//! so the same state machine serves both [`Node::download`] and
//! [`Node::async_download`].
//!
//! Decorators never restart a node. Every retry, alternative or timed attempt
//! runs on a fresh [`Node::fork`] of a template child, which is what keeps the
//! single-assignment terminal outcome sound.

mod alternate;
mod base;
mod delayed;
mod leaf;
mod meta_refresh;
mod retry;
mod timeout;
mod torrent;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::debug;

use crate::data::{FetchConfig, PR_SIZE, Properties, Resource};
use crate::engine::TorrentEngine;
use crate::error::{FetchError, Result};
use crate::listener::{Listener, ListenerId, OneShot};
use crate::transport::{Target, Transport};

pub(crate) use alternate::AlternateKind;
pub(crate) use delayed::DelayedKind;
pub use delayed::DelayedFactory;
pub use leaf::LeafOptions;
pub(crate) use meta_refresh::MetaRefreshKind;
pub(crate) use retry::RetryKind;
pub(crate) use timeout::TimeoutKind;
pub(crate) use torrent::TorrentKind;

use base::{NodeBase, SizeState};
use leaf::LeafKind;

/// Collaborators shared by every node a factory builds.
#[derive(Clone)]
pub(crate) struct Context {
    pub(crate) runtime:   Handle,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) engine:    Option<Arc<dyn TorrentEngine>>,
    pub(crate) config:    FetchConfig,
}

impl Context {
    /// A leaf for `target`, seeded with the configured user agent.
    pub(crate) fn leaf(self: &Arc<Self>, target: Target, options: LeafOptions) -> Node {
        let mut properties = Properties::new();
        if let Some(agent) = &self.config.user_agent {
            properties.insert("url_user-agent", Value::String(agent.clone()));
        }
        Node::from_kind(self.clone(), Box::new(LeafKind::new(target, options)), properties)
    }
}

/// Where a node is in its single-use life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    Unstarted,
    Active,
    Terminal,
}

/// Behaviour plugged into the shared node machinery.
#[async_trait]
pub(crate) trait NodeKind: Send + Sync {
    fn name(&self) -> String;

    /// Fresh, unstarted behaviour with the same configuration.
    fn fork(&self) -> Box<dyn NodeKind>;

    /// Template children; they get this node as parent on construction.
    fn children(&self) -> Vec<Node> { Vec::new() }

    /// Hook run before any probe, download or property read.
    fn prepare(&self, _node: &Node) {}

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>>;

    /// Kicks off the attempt. Must not block.
    fn start(&self, node: &Node);

    fn child_completed(&self, node: &Node, _child: &Node, resource: &Resource) -> bool {
        node.inform_complete(resource.clone())
    }

    fn child_failed(&self, node: &Node, _child: &Node, error: &FetchError) {
        node.inform_failed(error.clone());
    }

    /// Stops in-flight work after the node has been cancelled.
    fn interrupt(&self) {}

    fn cancellable(&self) -> bool { true }
}

pub(crate) struct Shared {
    base: NodeBase,
    kind: Box<dyn NodeKind>,
}

/// Handle to one node of a download tree.
///
/// Clones of the handle refer to the same node; use [`Node::fork`] for an
/// independent copy.
#[derive(Clone)]
pub struct Node {
    shared: Arc<Shared>,
}

impl Node {
    pub(crate) fn from_kind(
        ctx: Arc<Context>,
        kind: Box<dyn NodeKind>,
        properties: Properties,
    ) -> Self {
        let children = kind.children();
        let node = Self {
            shared: Arc::new(Shared {
                base: NodeBase::new(ctx, properties),
                kind,
            }),
        };
        for child in &children {
            child.attach(Some(&node));
        }
        node
    }

    /// Builds a decorator around caller-supplied children.
    pub(crate) fn compose(ctx: Arc<Context>, kind: Box<dyn NodeKind>) -> Result<Self> {
        if let Some(started) = kind.children().iter().find(|c| c.is_started()) {
            return Err(FetchError::InvalidTree(format!(
                "child '{}' has already started",
                started.name()
            )));
        }
        Ok(Self::from_kind(ctx, kind, Properties::new()))
    }

    pub fn name(&self) -> String { self.shared.kind.name() }

    pub fn lifecycle(&self) -> Lifecycle { self.base().lifecycle() }

    pub fn is_cancelled(&self) -> bool { self.base().is_cancelled() }

    /// Resolves the size without downloading.
    ///
    /// `Ok(None)` means the size is unavailable. The first resolution is
    /// cached; later calls never probe again. A failed probe marks the size
    /// unavailable and returns its error this once.
    pub async fn probe_size(&self) -> Result<Option<u64>> {
        self.shared.kind.prepare(self);
        let mut slot = self.base().size.lock().await;
        match *slot {
            SizeState::Known(size) => return Ok(Some(size)),
            SizeState::Unavailable => return Ok(None),
            SizeState::Unknown => {}
        }

        match self.shared.kind.resolve_size(self).await {
            Ok(Some(size)) => {
                *slot = SizeState::Known(size);
                drop(slot);
                self.set_property(PR_SIZE, Value::from(size));
                debug!(node = %self.name(), depth = self.depth(), size, "Size resolved");
                Ok(Some(size))
            }
            Ok(None) => {
                *slot = SizeState::Unavailable;
                Ok(None)
            }
            Err(e) => {
                *slot = SizeState::Unavailable;
                debug!(node = %self.name(), depth = self.depth(), error = %e, "Size probe failed");
                Err(e)
            }
        }
    }

    /// Starts the download without waiting for it.
    ///
    /// The outcome arrives through listeners. Fails with
    /// [`FetchError::AlreadyStarted`] on a second call.
    pub fn async_download(&self) -> Result<()> {
        if !self.base().mark_started()? {
            return Ok(());
        }
        self.shared.kind.prepare(self);
        debug!(node = %self.name(), depth = self.depth(), "Download started");
        self.shared.kind.start(self);
        Ok(())
    }

    /// Starts the download and waits for its outcome.
    pub async fn download(&self) -> Result<Resource> {
        let rx = self.start_waiting()?;
        rx.await.unwrap_or(Err(FetchError::Incomplete))
    }

    /// Like [`download`](Node::download) but parks the calling OS thread.
    ///
    /// Must not be called from inside an async context.
    pub fn download_blocking(&self) -> Result<Resource> {
        let rx = self.start_waiting()?;
        rx.blocking_recv().unwrap_or(Err(FetchError::Incomplete))
    }

    fn start_waiting(&self) -> Result<tokio::sync::oneshot::Receiver<Result<Resource>>> {
        let (listener, rx) = OneShot::channel();
        let id = self.add_listener(Arc::new(listener));
        if let Err(e) = self.async_download() {
            self.remove_listener(id);
            return Err(e);
        }
        Ok(rx)
    }

    /// Cancels the node and its in-flight child attempt.
    ///
    /// Idempotent. A node with no live work still terminates with
    /// [`FetchError::Cancelled`], so waiting callers are released.
    pub fn cancel(&self) { self.cancel_with(FetchError::Cancelled) }

    pub fn set_property(&self, name: &str, value: Value) {
        let first = self.base().properties.lock().insert(name, value.clone()).is_none();
        if !first {
            return;
        }
        if let Some(parent) = self.parent() {
            parent.set_property(name, value);
        }
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.shared.kind.prepare(self);
        self.base().properties.lock().get(name).cloned()
    }

    /// Reads a property, probing first when it is not known yet.
    pub async fn property_probed(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.property(name) {
            return Some(value);
        }
        if let Err(e) = self.probe_size().await {
            debug!(node = %self.name(), property = name, error = %e, "Probe for property failed");
        }
        self.property(name)
    }

    /// Snapshot of the local property bag.
    pub fn properties(&self) -> Properties { self.base().properties.lock().clone() }

    /// An independent, unstarted copy with the same configuration and a copy
    /// of the property bag.
    pub fn fork(&self, parent: Option<&Node>) -> Node {
        let ctx = self.base().ctx.clone();
        let node = Node::from_kind(ctx, self.shared.kind.fork(), self.properties());
        node.attach(parent);
        node
    }

    /// Re-attaches the node under `parent` for property propagation.
    ///
    /// Only allowed before the node starts, and never in a way that would
    /// make the node its own ancestor.
    pub fn set_parent(&self, parent: Option<&Node>) -> Result<()> {
        if self.is_started() {
            return Err(FetchError::AlreadyStarted);
        }
        if let Some(parent) = parent {
            let mut ancestor = Some(parent.clone());
            while let Some(candidate) = ancestor {
                if candidate.ptr_eq(self) {
                    return Err(FetchError::InvalidTree(format!(
                        "'{}' cannot be placed under its own descendant '{}'",
                        self.name(),
                        parent.name()
                    )));
                }
                ancestor = candidate.parent();
            }
        }
        self.attach(parent);
        Ok(())
    }

    pub fn parent(&self) -> Option<Node> {
        self.base()
            .parent
            .lock()
            .as_ref()
            .and_then(|weak| weak.upgrade())
            .map(|shared| Node { shared })
    }

    pub fn ptr_eq(&self, other: &Node) -> bool { Arc::ptr_eq(&self.shared, &other.shared) }

    /// Adds a listener, replaying the outcome at once if the node has terminated.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.register_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.base().state.lock().listeners.retain(|(l, _)| *l != id);
    }

    fn attach(&self, parent: Option<&Node>) {
        *self.base().parent.lock() = parent.map(|p| Arc::downgrade(&p.shared));
    }

    /// Copies `other`'s properties in, write-through-once.
    pub(crate) fn adopt_properties(&self, other: &Node) {
        for (name, value) in other.properties().iter() {
            self.set_property(name, value.clone());
        }
    }

    pub(crate) fn depth(&self) -> usize {
        let mut depth = 0;
        let mut current = self.parent();
        while let Some(node) = current {
            depth += 1;
            current = node.parent();
        }
        depth
    }

    pub(crate) fn is_started(&self) -> bool { self.base().state.lock().started }

    pub(crate) fn is_terminal(&self) -> bool { self.base().state.lock().outcome.is_some() }

    pub(crate) fn context(&self) -> &Arc<Context> { &self.base().ctx }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.base().ctx.runtime.spawn(future);
    }

    fn base(&self) -> &NodeBase { &self.shared.base }

    fn kind(&self) -> &dyn NodeKind { self.shared.kind.as_ref() }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Forwards a child attempt's events into its parent's behaviour.
pub(crate) struct ChildListener {
    parent: Node,
}

impl ChildListener {
    pub(crate) fn new(parent: &Node) -> Arc<Self> { Arc::new(Self { parent: parent.clone() }) }
}

impl Listener for ChildListener {
    fn report_activity(&self, _child: &Node, activity: &str) {
        self.parent.report_activity(activity)
    }

    fn report_percent_complete(&self, _child: &Node, percent: u8) {
        self.parent.report_percent_complete(percent)
    }

    fn report_amount_complete(&self, _child: &Node, bytes: u64) {
        self.parent.report_amount_complete(bytes)
    }

    fn completed(&self, child: &Node, resource: &Resource) -> bool {
        self.parent.kind().child_completed(&self.parent, child, resource)
    }

    fn failed(&self, child: &Node, error: &FetchError) {
        self.parent.kind().child_failed(&self.parent, child, error)
    }
}
