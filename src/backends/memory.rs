//! In-memory backend, used for tests and scratch stores.

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::backends::common::{check_cancelled, Backend, BackendIdentity, ObjectStream};
use crate::error::{Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Process-local store keeping objects in memory.
///
/// Downloads are served in `chunk_size` pieces so progress reporting behaves
/// like a networked backend.
pub struct MemoryBackend {
    identity: BackendIdentity,
    objects: RwLock<BTreeMap<String, Bytes>>,
    chunk_size: usize,
}

impl MemoryBackend {
    /// Creates an empty store.
    pub fn new(principal: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            identity: BackendIdentity::new(principal, bucket),
            objects: RwLock::new(BTreeMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Sets the download chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    /// True when the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    fn identity(&self) -> &BackendIdentity {
        &self.identity
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        Ok(self.objects.read().await.keys().cloned().collect())
    }

    async fn download(&self, name: &str, cancel: &CancellationToken) -> Result<ObjectStream> {
        check_cancelled(cancel)?;
        let data = self
            .objects
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::not_found(name))?;
        let length = data.len() as u64;
        let chunks: Vec<Result<Bytes>> = data
            .chunks(self.chunk_size)
            .map(|c| Ok(data.slice_ref(c)))
            .collect();
        Ok(ObjectStream::with_length(
            Box::pin(futures::stream::iter(chunks)),
            length,
        ))
    }

    #[instrument(skip(self, source, progress, cancel), fields(store = %self.identity))]
    async fn put(
        &self,
        name: &str,
        source: &mut ObjectStream,
        expected_length: u64,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        if name.is_empty() {
            return Err(StorageError::invalid_argument("object name is empty"));
        }
        let mut tracker = ProgressTracker::new(expected_length, progress);
        let mut body = BytesMut::new();
        while let Some(chunk) = source.next_chunk().await {
            check_cancelled(cancel)?;
            let chunk = chunk?;
            body.extend_from_slice(&chunk);
            tracker.advance(chunk.len() as u64);
        }
        self.objects
            .write()
            .await
            .insert(name.to_string(), body.freeze());
        tracker.finish();
        debug!(bytes = tracker.transferred(), "stored");
        Ok(())
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        self.objects
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::not_found(name))
    }
}
