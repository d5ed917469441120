use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::debug;

use super::{ChildListener, Node, NodeKind};
use crate::data::Properties;
use crate::error::{FetchError, Result};

/// Builds the real node behind a delayed node on first use.
pub trait DelayedFactory: Send + Sync {
    fn create(&self) -> Result<Node>;
}

impl<F> DelayedFactory for F
where
    F: Fn() -> Result<Node> + Send + Sync,
{
    fn create(&self) -> Result<Node> { self() }
}

/// Defers building its delegate until a probe, download or property read.
pub(crate) struct DelayedKind {
    factory:  Arc<dyn DelayedFactory>,
    delegate: OnceLock<Node>,
}

impl DelayedKind {
    pub(crate) fn new(factory: Arc<dyn DelayedFactory>) -> Self {
        Self {
            factory,
            delegate: OnceLock::new(),
        }
    }

    fn delegate(&self, node: &Node) -> &Node {
        self.delegate.get_or_init(|| {
            let delegate = match self.factory.create() {
                Ok(delegate) => match delegate.set_parent(Some(node)) {
                    Ok(()) => delegate,
                    Err(e) => error_node(node, e),
                },
                Err(e) => error_node(node, e),
            };
            debug!(node = %node.name(), delegate = %delegate.name(), "Delayed node resolved");
            for (name, value) in delegate.properties().iter() {
                node.set_property(name, value.clone());
            }
            delegate
        })
    }
}

fn error_node(node: &Node, error: FetchError) -> Node {
    debug!(node = %node.name(), error = %error, "Delayed factory failed");
    let kind = Box::new(ErrorKind { error });
    let error = Node::from_kind(node.context().clone(), kind, Properties::new());
    error.attach(Some(node));
    error
}

#[async_trait]
impl NodeKind for DelayedKind {
    fn name(&self) -> String {
        match self.delegate.get() {
            Some(delegate) => delegate.name(),
            None => "<delayed>".to_string(),
        }
    }

    fn fork(&self) -> Box<dyn NodeKind> { Box::new(Self::new(self.factory.clone())) }

    fn prepare(&self, node: &Node) { self.delegate(node); }

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        self.delegate(node).probe_size().await
    }

    fn start(&self, node: &Node) {
        let delegate = self.delegate(node);
        delegate.add_listener(ChildListener::new(node));
        if let Err(e) = delegate.async_download() {
            node.inform_failed(e);
        }
    }

    fn interrupt(&self) {
        if let Some(delegate) = self.delegate.get() {
            delegate.cancel();
        }
    }
}

/// Stands in for a delegate that could not be built; fails every operation.
struct ErrorKind {
    error: FetchError,
}

#[async_trait]
impl NodeKind for ErrorKind {
    fn name(&self) -> String { format!("<error: {}>", self.error) }

    fn fork(&self) -> Box<dyn NodeKind> {
        Box::new(ErrorKind {
            error: self.error.clone(),
        })
    }

    async fn resolve_size(&self, _node: &Node) -> Result<Option<u64>> { Err(self.error.clone()) }

    fn start(&self, node: &Node) { node.inform_failed(self.error.clone()) }
}
