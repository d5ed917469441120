use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::{LeafOptions, Node, NodeKind};
use crate::core::{find_meta_refresh, resolve_refresh};
use crate::data::{PR_CONTENT_TYPE, PR_URL, REQUEST_PREFIX, Resource};
use crate::error::{FetchError, Result};
use crate::listener::Relay;
use crate::transport::Target;

/// Redirect hops followed before the result is delivered as-is.
const MAX_FOLLOWS: usize = 1;

/// Follows an HTML `<meta http-equiv="refresh">` page to the real resource.
pub(crate) struct MetaRefreshKind {
    child:   Node,
    current: Arc<Mutex<Option<Node>>>,
}

impl MetaRefreshKind {
    pub(crate) fn new(child: Node) -> Self {
        Self {
            child,
            current: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl NodeKind for MetaRefreshKind {
    fn name(&self) -> String { self.child.name() }

    fn fork(&self) -> Box<dyn NodeKind> { Box::new(Self::new(self.child.fork(None))) }

    fn children(&self) -> Vec<Node> { vec![self.child.clone()] }

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        let probe = self.child.fork(None);
        let size = probe.probe_size().await?;
        node.adopt_properties(&probe);
        Ok(size)
    }

    fn start(&self, node: &Node) {
        let first = self.child.fork(Some(node));
        let current = self.current.clone();
        let task_node = node.clone();
        node.spawn(async move {
            match follow(&task_node, first, &current).await {
                Ok(resource) => task_node.deliver(resource),
                Err(e) => task_node.inform_failed(e),
            }
        });
    }

    fn interrupt(&self) {
        let current = self.current.lock().clone();
        if let Some(current) = current {
            current.cancel();
        }
    }
}

async fn run(node: &Node, attempt: Node, current: &Mutex<Option<Node>>) -> Result<Resource> {
    *current.lock() = Some(attempt.clone());
    if node.is_cancelled() {
        attempt.cancel();
    }
    attempt.add_listener(Arc::new(Relay::new(node)));
    attempt.download().await
}

async fn follow(node: &Node, first: Node, current: &Mutex<Option<Node>>) -> Result<Resource> {
    let mut attempt = first;
    let mut follows = 0;
    loop {
        let resource = run(node, attempt.clone(), current).await?;
        if follows == MAX_FOLLOWS {
            return Ok(resource);
        }

        let seekable = resource.is_seekable();
        if seekable && !may_be_html(&attempt, &resource) {
            return Ok(resource);
        }
        let page = resource.bytes().await?;
        let Some(target) = find_meta_refresh(&String::from_utf8_lossy(&page)) else {
            if seekable {
                return Ok(resource);
            }
            return Err(FetchError::RefreshNotRecoverable);
        };

        let base = attempt
            .property(PR_URL)
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| Some(attempt.name()).filter(|n| n.contains("://")));
        let url = resolve_refresh(base.as_deref(), &target)?;
        node.report_activity(&format!("Following meta refresh to {url}"));
        debug!(node = %node.name(), depth = node.depth(), target = %url, "Meta refresh found");

        let next = node.context().leaf(Target::Url(url), LeafOptions::default());
        for (name, value) in attempt.properties().iter() {
            if name.starts_with(REQUEST_PREFIX) {
                next.set_property(name, value.clone());
            }
        }
        next.attach(Some(node));
        attempt = next;
        follows += 1;
    }
}

/// Skips the scan for bodies the transport labelled as something other than HTML.
fn may_be_html(attempt: &Node, resource: &Resource) -> bool {
    let content_type = resource.content_type().map(str::to_string).or_else(|| {
        attempt
            .property(PR_CONTENT_TYPE)
            .and_then(|v| v.as_str().map(str::to_string))
    });
    match content_type {
        Some(ct) => ct.to_ascii_lowercase().contains("html"),
        None => true,
    }
}

