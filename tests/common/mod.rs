#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use bytes::Bytes;
use object_storage::{
    Backend, BackendIdentity, CancellationToken, ErrorKind, ItemFailure, MemoryBackend,
    ObjectStream, ProgressObserver, Result, StorageError, TransferObserver,
};

/// Wraps a memory store, recording every primitive call and failing the
/// ones it is told to.
pub struct RecordingBackend {
    pub inner: MemoryBackend,
    pub calls: Mutex<Vec<String>>,
    pub fail_download: HashSet<String>,
    pub fail_upload: HashSet<String>,
    pub fail_delete: HashSet<String>,
    /// Stored into the wrapped store on the next download.
    pub late_arrival: Mutex<Option<String>>,
}

impl RecordingBackend {
    pub fn new(principal: &str, bucket: &str) -> Self {
        Self {
            inner: MemoryBackend::new(principal, bucket),
            calls: Mutex::new(vec![]),
            fail_download: HashSet::new(),
            fail_upload: HashSet::new(),
            fail_delete: HashSet::new(),
            late_arrival: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn injected(op: &str, name: &str) -> StorageError {
    StorageError::new(ErrorKind::TemporaryFailure, format!("injected {op} failure for {name}"))
}

#[async_trait::async_trait]
impl Backend for RecordingBackend {
    fn identity(&self) -> &BackendIdentity {
        self.inner.identity()
    }

    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.record("list".to_string());
        self.inner.list(cancel).await
    }

    async fn download(&self, name: &str, cancel: &CancellationToken) -> Result<ObjectStream> {
        self.record(format!("download:{name}"));
        if self.fail_download.contains(name) {
            return Err(injected("download", name));
        }
        let late = self.late_arrival.lock().unwrap().take();
        if let Some(late) = late {
            put(&self.inner, &late, "arrived mid-transfer").await;
        }
        self.inner.download(name, cancel).await
    }

    async fn put(
        &self,
        name: &str,
        source: &mut ObjectStream,
        expected_length: u64,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.record(format!("put:{name}"));
        if self.fail_upload.contains(name) {
            return Err(injected("upload", name));
        }
        self.inner
            .put(name, source, expected_length, progress, cancel)
            .await
    }

    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        self.record(format!("delete:{name}"));
        if self.fail_delete.contains(name) {
            return Err(injected("delete", name));
        }
        self.inner.delete(name, cancel).await
    }
}

/// Collects transfer callbacks.
#[derive(Default)]
pub struct CollectingObserver {
    pub successes: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<(String, object_storage::Stage, ErrorKind)>>,
}

impl TransferObserver for CollectingObserver {
    fn on_success(&self, name: &str) {
        self.successes.lock().unwrap().push(name.to_string());
    }

    fn on_error(&self, failure: &ItemFailure) {
        self.errors.lock().unwrap().push((
            failure.name.clone(),
            failure.stage,
            failure.error.kind(),
        ));
    }
}

pub async fn put(store: &dyn Backend, name: &str, body: &str) {
    let mut stream = ObjectStream::from_bytes(body.to_string());
    store
        .upload(name, &mut stream, true, None, &CancellationToken::new(), 0)
        .await
        .unwrap();
}

pub async fn get(store: &dyn Backend, name: &str) -> Bytes {
    store
        .download(name, &CancellationToken::new())
        .await
        .unwrap()
        .read_to_end()
        .await
        .unwrap()
}

pub async fn sorted_names(store: &dyn Backend) -> Vec<String> {
    let mut names = store.list(&CancellationToken::new()).await.unwrap();
    names.sort();
    names
}
