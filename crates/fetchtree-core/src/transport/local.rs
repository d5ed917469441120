use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream;
use serde_json::json;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use super::{Fetched, Probe, Request, Transport};
use crate::data::{PR_URL, Properties};
use crate::error::{FetchError, Result};

const CHUNK_SIZE: usize = 64 * 1024;

/// Reads `Target::File` and `file://` targets with `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self { Self }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn probe(&self, request: &Request, cancel: &CancellationToken) -> Result<Probe> {
        let path = request
            .target
            .local_path()
            .ok_or_else(|| FetchError::transport(&request.target, "not a local target"))?;

        let meta = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            meta = tokio::fs::metadata(&path) => {
                meta.map_err(|e| FetchError::transport(&request.target, e))?
            }
        };
        if meta.is_dir() {
            return Err(FetchError::transport(&request.target, "is a directory"));
        }

        let mut properties = Properties::new();
        properties.insert(PR_URL, json!(request.target.to_string()));
        Ok(Probe {
            size: Some(meta.len()),
            properties,
        })
    }

    async fn fetch(&self, request: &Request, cancel: &CancellationToken) -> Result<Fetched> {
        let probe = self.probe(request, cancel).await?;
        let path = request
            .target
            .local_path()
            .ok_or_else(|| FetchError::transport(&request.target, "not a local target"))?;
        let target = request.target.to_string();

        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FetchError::transport(&target, e))?;

        let cancel = cancel.clone();
        let body = stream::unfold(Some(file), move |state| {
            let cancel = cancel.clone();
            let target = target.clone();
            async move {
                let mut file = state?;
                if cancel.is_cancelled() {
                    return Some((Err(FetchError::Cancelled), None));
                }
                let mut buf = vec![0u8; CHUNK_SIZE];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(Bytes::from(buf)), Some(file)))
                    }
                    Err(e) => Some((Err(FetchError::transport(&target, e)), None)),
                }
            }
        });

        Ok(Fetched {
            size:       probe.size,
            body:       Box::pin(body),
            properties: probe.properties,
        })
    }
}
