use async_trait::async_trait;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use tracing::debug;

use super::{ChildListener, Node, NodeKind};
use crate::error::{FetchError, Result};

#[derive(Default)]
struct Cursor {
    index:      usize,
    current:    Option<Node>,
    last_error: Option<FetchError>,
}

/// Tries children in a fixed order until one succeeds.
pub(crate) struct AlternateKind {
    children:   Vec<Node>,
    max_to_try: usize,
    state:      Mutex<Cursor>,
}

impl AlternateKind {
    /// `max_to_try` of `None` tries every child. A random order is drawn here
    /// once and kept by every fork.
    pub(crate) fn new(mut children: Vec<Node>, max_to_try: Option<usize>, random: bool) -> Self {
        if random {
            children.shuffle(&mut rand::thread_rng());
        }
        let max_to_try = max_to_try.map_or(children.len(), |m| m.min(children.len()));
        Self::ordered(children, max_to_try)
    }

    fn ordered(children: Vec<Node>, max_to_try: usize) -> Self {
        Self {
            children,
            max_to_try,
            state: Mutex::new(Cursor::default()),
        }
    }

    fn next_alternative(&self, node: &Node) {
        let fork = {
            let mut state = self.state.lock();
            if node.is_terminal() {
                return;
            }
            if state.index >= self.max_to_try {
                let last = state.last_error.clone().unwrap_or(FetchError::NoAlternatives);
                let attempts = state.index;
                drop(state);
                node.inform_failed(FetchError::exhausted(attempts, last));
                return;
            }
            let fork = self.children[state.index].fork(Some(node));
            state.index += 1;
            state.current = Some(fork.clone());
            debug!(
                node = %node.name(),
                depth = node.depth(),
                alternative = %fork.name(),
                index = state.index,
                max = self.max_to_try,
                "Trying alternative"
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
impl NodeKind for AlternateKind {
    fn name(&self) -> String {
        let names: Vec<String> = self.children.iter().map(Node::name).collect();
        format!("[{}]", names.join(","))
    }

    fn fork(&self) -> Box<dyn NodeKind> {
        let children = self.children.iter().map(|c| c.fork(None)).collect();
        Box::new(Self::ordered(children, self.max_to_try))
    }

    fn children(&self) -> Vec<Node> { self.children.clone() }

    /// Independent of the download cursor: a probe may settle on a different
    /// child than the one a later download ends up using.
    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        let mut last = None;
        for child in self.children.iter().take(self.max_to_try) {
            if node.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let probe = child.fork(None);
            match probe.probe_size().await {
                Ok(size) => {
                    node.adopt_properties(&probe);
                    return Ok(size);
                }
                Err(e) => {
                    debug!(
                        node = %node.name(),
                        alternative = %probe.name(),
                        error = %e,
                        "Alternative probe failed"
                    );
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or(FetchError::NoAlternatives))
    }

    fn start(&self, node: &Node) {
        if self.max_to_try == 0 {
            node.inform_failed(FetchError::NoAlternatives);
            return;
        }
        self.next_alternative(node);
    }

    fn child_failed(&self, node: &Node, _child: &Node, error: &FetchError) {
        self.state.lock().last_error = Some(error.clone());
        self.next_alternative(node);
    }

    fn interrupt(&self) {
        let current = self.state.lock().current.clone();
        if let Some(current) = current {
            current.cancel();
        }
    }
}
