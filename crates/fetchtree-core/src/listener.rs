//! Observer interface for node progress and terminal outcomes.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::data::Resource;
use crate::error::{FetchError, Result};
use crate::node::Node;

/// Handle returned by [`Node::add_listener`], used to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "listener#{}", self.0) }
}

/// Receives reports and the single terminal outcome of a node.
///
/// Callbacks may arrive on any runtime worker thread. Each listener sees at
/// most one terminal call (`completed` or `failed`); a listener added after the
/// node terminated gets that stored outcome replayed immediately.
///
/// Returning `false` from [`completed`](Listener::completed) vetoes the result:
/// the producing node reports [`FetchError::Rejected`] instead, which decorators
/// above it treat like any other child failure. A vetoing listener stays
/// registered, so it may be offered the result of a later attempt.
pub trait Listener: Send + Sync {
    fn report_activity(&self, _node: &Node, _activity: &str) {}

    fn report_percent_complete(&self, _node: &Node, _percent: u8) {}

    fn report_amount_complete(&self, _node: &Node, _bytes: u64) {}

    fn completed(&self, node: &Node, resource: &Resource) -> bool;

    fn failed(&self, node: &Node, error: &FetchError);
}

/// Bridges one terminal outcome into a oneshot channel.
pub(crate) struct OneShot {
    tx: Mutex<Option<oneshot::Sender<Result<Resource>>>>,
}

impl OneShot {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<Resource>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Mutex::new(Some(tx)) }, rx)
    }

    fn send(&self, outcome: Result<Resource>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Listener for OneShot {
    fn completed(&self, _node: &Node, resource: &Resource) -> bool {
        self.send(Ok(resource.clone()));
        true
    }

    fn failed(&self, _node: &Node, error: &FetchError) { self.send(Err(error.clone())); }
}

/// Passes progress reports from a child up to `parent` without taking part in
/// the child's outcome.
pub(crate) struct Relay {
    parent: Node,
}

impl Relay {
    pub(crate) fn new(parent: &Node) -> Self { Self { parent: parent.clone() } }
}

impl Listener for Relay {
    fn report_activity(&self, _node: &Node, activity: &str) {
        self.parent.report_activity(activity)
    }

    fn report_percent_complete(&self, _node: &Node, percent: u8) {
        self.parent.report_percent_complete(percent)
    }

    fn report_amount_complete(&self, _node: &Node, bytes: u64) {
        self.parent.report_amount_complete(bytes)
    }

    fn completed(&self, _node: &Node, _resource: &Resource) -> bool { true }

    fn failed(&self, _node: &Node, _error: &FetchError) {}
}
