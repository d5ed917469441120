use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};
use parking_lot::Mutex;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

use crate::error::{FetchError, Result};
use crate::transport::ByteStream;

/// The successful payload of a node.
///
/// A cheap handle: every listener of a node receives a clone of the same
/// resource. Spooled bodies are deleted when the last handle drops, so
/// dropping a rejected resource releases it.
#[derive(Clone)]
pub struct Resource {
    inner: Arc<Inner>,
}

struct Inner {
    body:         Body,
    len:          Option<u64>,
    content_type: Option<String>,
}

enum Body {
    Memory(Bytes),
    Spooled(TempPath),
    File(PathBuf),
    /// Live transport stream; readable exactly once.
    Stream(Mutex<Option<ByteStream>>),
}

impl Resource {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = Some(bytes.len() as u64);
        Self::new(Body::Memory(bytes), len, None)
    }

    pub fn from_file(path: impl Into<PathBuf>, len: Option<u64>) -> Self {
        Self::new(Body::File(path.into()), len, None)
    }

    pub fn from_stream(stream: ByteStream, len: Option<u64>) -> Self {
        Self::new(Body::Stream(Mutex::new(Some(stream))), len, None)
    }

    pub(crate) fn spooled(path: TempPath, len: u64) -> Self {
        Self::new(Body::Spooled(path), Some(len), None)
    }

    fn new(body: Body, len: Option<u64>, content_type: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                body,
                len,
                content_type,
            }),
        }
    }

    /// Attaches a content type. Only effective before the handle is shared.
    pub(crate) fn with_content_type(self, content_type: Option<String>) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.content_type = content_type;
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    pub fn len(&self) -> Option<u64> { self.inner.len }

    pub fn content_type(&self) -> Option<&str> { self.inner.content_type.as_deref() }

    /// Whether the body can be read more than once.
    pub fn is_seekable(&self) -> bool { !matches!(self.inner.body, Body::Stream(_)) }

    /// On-disk location for file-backed bodies.
    pub fn path(&self) -> Option<&Path> {
        match &self.inner.body {
            Body::Spooled(p) => Some(p.as_ref()),
            Body::File(p) => Some(p.as_path()),
            _ => None,
        }
    }

    /// Reads the whole body. Consumes a live stream.
    pub async fn bytes(&self) -> Result<Bytes> {
        match &self.inner.body {
            Body::Memory(b) => Ok(b.clone()),
            Body::Spooled(p) => Ok(Bytes::from(tokio::fs::read(p).await?)),
            Body::File(p) => Ok(Bytes::from(tokio::fs::read(p).await?)),
            Body::Stream(_) => {
                let mut stream = self.take_stream()?;
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// The body as a chunk stream. Consumes a live stream.
    pub async fn stream(&self) -> Result<ByteStream> {
        if let Body::Stream(_) = &self.inner.body {
            return self.take_stream();
        }
        let bytes = self.bytes().await?;
        Ok(Box::pin(stream::once(async move { Ok::<_, FetchError>(bytes) })))
    }

    /// Copies the body to `dest`, returning the number of bytes written.
    pub async fn write_to(&self, dest: &Path) -> Result<u64> {
        if let Some(src) = self.path() {
            return Ok(tokio::fs::copy(src, dest).await?);
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = self.stream().await?;
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.sync_all().await?;
        Ok(written)
    }

    fn take_stream(&self) -> Result<ByteStream> {
        match &self.inner.body {
            Body::Stream(slot) => slot.lock().take().ok_or_else(|| {
                FetchError::from(io::Error::other("stream body already consumed"))
            }),
            _ => Err(FetchError::from(io::Error::other("not a stream body"))),
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.inner.body {
            Body::Memory(_) => "memory",
            Body::Spooled(_) => "spooled",
            Body::File(_) => "file",
            Body::Stream(_) => "stream",
        };
        f.debug_struct("Resource")
            .field("body", &kind)
            .field("len", &self.inner.len)
            .field("content_type", &self.inner.content_type)
            .finish()
    }
}
