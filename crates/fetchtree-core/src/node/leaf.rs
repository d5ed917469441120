use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{Node, NodeKind};
use crate::data::{PR_CONTENT_TYPE, PR_SIZE, Resource};
use crate::error::{FetchError, Result};
use crate::transport::{Fetched, Request, Target};

/// Per-leaf download options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeafOptions {
    /// Hand the transport stream through as a one-shot, unbuffered body.
    pub streaming: bool,
}

/// URL and file leaves: the only nodes that talk to the transport.
pub(crate) struct LeafKind {
    target:  Target,
    options: LeafOptions,
    cancel:  CancellationToken,
}

impl LeafKind {
    pub(crate) fn new(target: Target, options: LeafOptions) -> Self {
        Self {
            target,
            options,
            cancel: CancellationToken::new(),
        }
    }

    fn request(&self, node: &Node) -> Request {
        Request::new(self.target.clone()).with_headers(node.properties().request_headers())
    }
}

#[async_trait]
impl NodeKind for LeafKind {
    fn name(&self) -> String { self.target.to_string() }

    fn fork(&self) -> Box<dyn NodeKind> { Box::new(Self::new(self.target.clone(), self.options)) }

    async fn resolve_size(&self, node: &Node) -> Result<Option<u64>> {
        if self.target.is_magnet() {
            return Ok(None);
        }
        let probe = node
            .context()
            .transport
            .probe(&self.request(node), &self.cancel)
            .await?;
        for (name, value) in probe.properties.iter() {
            node.set_property(name, value.clone());
        }
        Ok(probe.size)
    }

    fn start(&self, node: &Node) {
        let node = node.clone();
        let request = self.request(&node);
        let streaming = self.options.streaming;
        let cancel = self.cancel.clone();

        node.clone().spawn(async move {
            match fetch(&node, &request, streaming, &cancel).await {
                Ok(resource) => node.deliver(resource),
                Err(e) => node.inform_failed(e),
            }
        });
    }

    fn interrupt(&self) { self.cancel.cancel() }
}

async fn fetch(
    node: &Node,
    request: &Request,
    streaming: bool,
    cancel: &CancellationToken,
) -> Result<Resource> {
    node.report_activity(&format!("Downloading {}", request.target));
    let fetched = node.context().transport.fetch(request, cancel).await?;

    // Properties land before the terminal event so parents can read them in `completed`.
    for (name, value) in fetched.properties.iter() {
        node.set_property(name, value.clone());
    }
    if let Some(size) = fetched.size {
        node.set_property(PR_SIZE, Value::from(size));
    }
    let content_type = fetched
        .properties
        .get(PR_CONTENT_TYPE)
        .and_then(Value::as_str)
        .map(str::to_string);

    let resource = if streaming {
        Resource::from_stream(fetched.body, fetched.size)
    } else {
        let threshold = node.context().config.max_in_memory_bytes;
        read_body(node, fetched, threshold, cancel).await?
    };
    Ok(resource.with_content_type(content_type))
}

/// Buffers the body, spilling to a temporary file past `threshold` bytes.
async fn read_body(
    node: &Node,
    fetched: Fetched,
    threshold: u64,
    cancel: &CancellationToken,
) -> Result<Resource> {
    let Fetched { size, mut body, .. } = fetched;
    let mut buffer = BytesMut::new();
    let mut spool: Option<(tokio::fs::File, tempfile::TempPath)> = None;
    let mut received = 0u64;
    let mut last_percent = None;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else { break };
        let chunk = chunk?;
        received += chunk.len() as u64;

        match spool.as_mut() {
            Some((file, _)) => file.write_all(&chunk).await?,
            None => {
                buffer.extend_from_slice(&chunk);
                if buffer.len() as u64 > threshold {
                    let (file, path) = tempfile::NamedTempFile::new()?.into_parts();
                    let mut file = tokio::fs::File::from_std(file);
                    file.write_all(&buffer).await?;
                    buffer = BytesMut::new();
                    spool = Some((file, path));
                }
            }
        }

        node.report_amount_complete(received);
        if let Some(total) = size.filter(|t| *t > 0) {
            let percent = (received.min(total) * 100 / total) as u8;
            if last_percent != Some(percent) {
                last_percent = Some(percent);
                node.report_percent_complete(percent);
            }
        }
    }

    match spool {
        Some((mut file, path)) => {
            file.flush().await?;
            Ok(Resource::spooled(path, received))
        }
        None => Ok(Resource::from_bytes(buffer.freeze())),
    }
}
