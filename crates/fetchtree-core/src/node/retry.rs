use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{ChildListener, Node, NodeKind};
use crate::error::{FetchError, Result};

#[derive(Default)]
struct Attempts {
    attempt:    usize,
    current:    Option<Node>,
    last_error: Option<FetchError>,
}

/// Re-runs a fresh fork of the child until one succeeds or the bound is hit.
pub(crate) struct RetryKind {
    child:        Node,
    max_attempts: usize,
    state:        Mutex<Attempts>,
}

impl RetryKind {
    pub(crate) fn new(child: Node, max_attempts: usize) -> Self {
        Self {
            child,
            max_attempts: max_attempts.max(1),
            state: Mutex::new(Attempts::default()),
        }
    }

    fn next_attempt(&self, node: &Node) {
        let fork = {
            let mut state = self.state.lock();
            if node.is_terminal() {
                return;
            }
            if state.attempt >= self.max_attempts {
                let last = state.last_error.clone().unwrap_or(FetchError::Incomplete);
                let attempts = state.attempt;
                drop(state);
                node.inform_failed(FetchError::exhausted(attempts, last));
                return;
            }
            state.attempt += 1;
            let fork = self.child.fork(Some(node));
            state.current = Some(fork.clone());
            debug!(
                node = %node.name(),
                depth = node.depth(),
                attempt = state.attempt,
                max = self.max_attempts,
                "Starting attempt"
            );
            fork
        };

        fork.add_listener(ChildListener::new(node));
        if node.is_cancelled() {
            fork.cancel();
        }
        if let Err(e) = fork.async_download() {
            node.inform_failed(e);
        }
    }
}

#[async_trait]
impl NodeKind for RetryKind {
    fn name(&self) -> String { self.child.name() }

    fn fork(&self) -> Box<dyn NodeKind> {
        Box::new(Self::new(self.child.fork(None), self.max_attempts))
    }

    fn children(&self) -> Vec<Node> { vec![self.child.clone()] }

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        let mut last = None;
        for attempt in 1..=self.max_attempts {
            if node.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let probe = self.child.fork(None);
            match probe.probe_size().await {
                Ok(size) => {
                    node.adopt_properties(&probe);
                    return Ok(size);
                }
                Err(e) => {
                    debug!(node = %node.name(), attempt, error = %e, "Size probe attempt failed");
                    last = Some(e);
                }
            }
        }
        Err(FetchError::exhausted(
            self.max_attempts,
            last.unwrap_or(FetchError::Incomplete),
        ))
    }

    fn start(&self, node: &Node) { self.next_attempt(node) }

    fn child_failed(&self, node: &Node, _child: &Node, error: &FetchError) {
        self.state.lock().last_error = Some(error.clone());
        self.next_attempt(node);
    }

    fn interrupt(&self) {
        let current = self.state.lock().current.clone();
        if let Some(current) = current {
            current.cancel();
        }
    }
}
