use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{ChildListener, Node, NodeKind};
use crate::data::Resource;
use crate::error::{FetchError, Result};

#[derive(Default)]
struct Race {
    current:  Option<Node>,
    watchdog: Option<JoinHandle<()>>,
}

/// Races one fork of the child against a watchdog.
pub(crate) struct TimeoutKind {
    child:   Node,
    timeout: Duration,
    state:   Mutex<Race>,
}

impl TimeoutKind {
    pub(crate) fn new(child: Node, timeout: Duration) -> Self {
        Self {
            child,
            timeout,
            state: Mutex::new(Race::default()),
        }
    }

    fn stop_watchdog(&self) {
        if let Some(watchdog) = self.state.lock().watchdog.take() {
            watchdog.abort();
        }
    }
}

#[async_trait]
impl NodeKind for TimeoutKind {
    fn name(&self) -> String { self.child.name() }

    fn fork(&self) -> Box<dyn NodeKind> { Box::new(Self::new(self.child.fork(None), self.timeout)) }

    fn children(&self) -> Vec<Node> { vec![self.child.clone()] }

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        let probe = self.child.fork(None);
        match tokio::time::timeout(self.timeout, probe.probe_size()).await {
            Ok(Ok(size)) => {
                node.adopt_properties(&probe);
                Ok(size)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                probe.cancel();
                Err(FetchError::Timeout(self.timeout))
            }
        }
    }

    fn start(&self, node: &Node) {
        let fork = self.child.fork(Some(node));
        fork.add_listener(ChildListener::new(node));

        // `current` must be visible to `interrupt` before the watchdog can fire.
        self.state.lock().current = Some(fork.clone());

        let watched = node.clone();
        let timeout = self.timeout;
        let watchdog = node.context().runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            watched.cancel_with(FetchError::Timeout(timeout));
        });
        self.state.lock().watchdog = Some(watchdog);

        if let Err(e) = fork.async_download() {
            self.stop_watchdog();
            node.inform_failed(e);
        }
    }

    fn child_completed(&self, node: &Node, _child: &Node, resource: &Resource) -> bool {
        self.stop_watchdog();
        node.inform_complete(resource.clone())
    }

    fn child_failed(&self, node: &Node, _child: &Node, error: &FetchError) {
        self.stop_watchdog();
        node.inform_failed(error.clone());
    }

    fn interrupt(&self) {
        let current = {
            let mut state = self.state.lock();
            if let Some(watchdog) = state.watchdog.take() {
                watchdog.abort();
            }
            state.current.clone()
        };
        if let Some(current) = current {
            current.cancel();
        }
    }
}
