//! The storage capability contract shared by every backend.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::transfer::{self, DeleteAllSummary, TransferObserver, TransferSummary};

/// Boxed stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Identifies a logical store: who is accessing it and which bucket or
/// container it is. Two backends with equal identities are the same store,
/// whatever their concrete type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendIdentity {
    principal: String,
    bucket: String,
}

impl BackendIdentity {
    /// Creates an identity tuple.
    pub fn new(principal: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            bucket: bucket.into(),
        }
    }

    /// User, account or access key the backend acts as.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Bucket, container or root directory.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

impl fmt::Display for BackendIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.principal, self.bucket)
    }
}

/// Object bytes with an optional declared length.
///
/// Uploads borrow the stream. Passing `dispose_source = true` to
/// [`Backend::upload`] hands it over: the underlying stream is released once
/// the upload returns, on success or failure.
pub struct ObjectStream {
    inner: Option<ByteStream>,
    length: Option<u64>,
}

impl ObjectStream {
    /// Wraps a stream of unknown length.
    pub fn new(stream: ByteStream) -> Self {
        Self {
            inner: Some(stream),
            length: None,
        }
    }

    /// Wraps a stream that declares its length.
    pub fn with_length(stream: ByteStream, length: u64) -> Self {
        Self {
            inner: Some(stream),
            length: Some(length),
        }
    }

    /// In-memory body. The length is known.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let length = data.len() as u64;
        let chunk = futures::future::ready(Ok::<_, StorageError>(data));
        Self::with_length(Box::pin(futures::stream::once(chunk)), length)
    }

    /// Opens a local file; its current size becomes the declared length.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let length = file.metadata().await?.len();
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::from));
        Ok(Self::with_length(Box::pin(stream), length))
    }

    /// Declared length, if any.
    pub fn len(&self) -> Option<u64> {
        self.length
    }

    /// True when the declared length is zero.
    pub fn is_empty(&self) -> bool {
        self.length == Some(0)
    }

    /// Whether the underlying stream has been released.
    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    /// Drops the underlying stream and whatever handles it owns.
    pub fn release(&mut self) {
        self.inner = None;
    }

    /// Next chunk, `None` at end of stream. Reading a released stream fails.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes>> {
        match self.inner.as_mut() {
            Some(stream) => stream.next().await,
            None => Some(Err(StorageError::invalid_argument(
                "object stream was already released",
            ))),
        }
    }

    /// Reads the remaining bytes into memory.
    pub async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut out = bytes::BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out.freeze())
    }
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream")
            .field("length", &self.length)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Releases the wrapped stream when dropped, if armed.
struct ReleaseGuard<'a> {
    stream: &'a mut ObjectStream,
    armed: bool,
}

impl Deref for ReleaseGuard<'_> {
    type Target = ObjectStream;

    fn deref(&self) -> &ObjectStream {
        self.stream
    }
}

impl DerefMut for ReleaseGuard<'_> {
    fn deref_mut(&mut self) -> &mut ObjectStream {
        self.stream
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stream.release();
        }
    }
}

/// Fails with [`crate::ErrorKind::Cancelled`] if `cancel` has fired.
pub fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(StorageError::cancelled())
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
/// The capability contract every storage backend implements.
///
/// Adapters provide the primitives (`identity`, `list`, `download`, `put`,
/// `delete`). Everything else has a provider independent default built from
/// those primitives, which adapters may override with a native equivalent.
pub trait Backend: Send + Sync {
    /// Identity tuple of the store behind this backend.
    fn identity(&self) -> &BackendIdentity;

    /// Full flat listing of object names, in no particular order.
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>>;

    /// Opens the object for reading. Fails with `NotFound` if absent.
    async fn download(&self, name: &str, cancel: &CancellationToken) -> Result<ObjectStream>;

    /// Creates or replaces `name` with the contents of `source`.
    ///
    /// Must be atomic from a reader's point of view. `expected_length` is the
    /// resolved total for progress reporting, `0` when unknown. Callers use
    /// [`Backend::upload`].
    async fn put(
        &self,
        name: &str,
        source: &mut ObjectStream,
        expected_length: u64,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    /// Removes the object. Fails with `NotFound` if absent.
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()>;

    /// Whether `other` is the same logical store.
    fn same_store(&self, other: &dyn Backend) -> bool {
        self.identity() == other.identity()
    }

    /// Copies the object into a caller owned sink, reporting progress.
    /// The sink is flushed but left open. Returns the number of bytes copied.
    async fn download_to(
        &self,
        name: &str,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let mut source = self.download(name, cancel).await?;
        let mut tracker = ProgressTracker::new(source.len().unwrap_or(0), progress);
        while let Some(chunk) = source.next_chunk().await {
            check_cancelled(cancel)?;
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            tracker.advance(chunk.len() as u64);
        }
        sink.flush().await?;
        tracker.finish();
        Ok(tracker.transferred())
    }

    /// Uploads `source` under `name`.
    ///
    /// When `expected_length` is `0` the stream's declared length is used for
    /// progress; without either, percentages stay undefined until the
    /// transfer completes. With `dispose_source` the stream is released on
    /// every exit path.
    async fn upload(
        &self,
        name: &str,
        source: &mut ObjectStream,
        dispose_source: bool,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
        expected_length: u64,
    ) -> Result<()> {
        let mut guard = ReleaseGuard {
            stream: source,
            armed: dispose_source,
        };
        check_cancelled(cancel)?;
        let expected = if expected_length > 0 {
            expected_length
        } else {
            guard.len().unwrap_or(0)
        };
        self.put(name, &mut guard, expected, progress, cancel).await
    }

    /// Deletes every object, one at a time. `on_deleted` receives the running
    /// count after each successful delete.
    async fn delete_all(
        &self,
        on_deleted: Option<&(dyn Fn(u64) + Send + Sync)>,
        cancel: &CancellationToken,
    ) -> Result<DeleteAllSummary> {
        transfer::delete_all(self, on_deleted, cancel).await
    }

    /// Moves or copies every object into `destination`. See
    /// [`transfer::transfer`].
    async fn transfer_to(
        &self,
        destination: &dyn Backend,
        delete_source: bool,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        transfer::transfer(self, destination, delete_source, observer, cancel).await
    }
}

impl fmt::Debug for dyn Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({})", self.identity())
    }
}
