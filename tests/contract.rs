mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use common::{get, put, sorted_names};
use object_storage::{
    Backend, CancellationToken, ErrorKind, LocalBackend, MemoryBackend, ObjectStream,
    ProgressSnapshot,
};

async fn backends() -> (tempfile::TempDir, Vec<Box<dyn Backend>>) {
    let dir = tempfile::tempdir().unwrap();
    let local = LocalBackend::new(dir.path()).await.unwrap();
    let memory = MemoryBackend::new("tester", "bucket").with_chunk_size(16);
    (dir, vec![Box::new(memory), Box::new(local)])
}

#[tokio::test]
async fn test_upload_then_download_round_trips() {
    let (_dir, stores) = backends().await;
    for store in &stores {
        let body = "The quick brown fox jumps over the lazy dog".repeat(10);
        put(store.as_ref(), "fox.txt", &body).await;
        assert_eq!(get(store.as_ref(), "fox.txt").await, Bytes::from(body));
        assert_eq!(sorted_names(store.as_ref()).await, vec!["fox.txt"]);
    }
}

#[tokio::test]
async fn test_double_upload_overwrites() {
    let (_dir, stores) = backends().await;
    for store in &stores {
        put(store.as_ref(), "doc", "first version, rather long").await;
        put(store.as_ref(), "doc", "second").await;
        assert_eq!(get(store.as_ref(), "doc").await, Bytes::from("second"));
        assert_eq!(sorted_names(store.as_ref()).await, vec!["doc"]);
    }
}

#[tokio::test]
async fn test_missing_objects_are_not_found() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        let err = store.download("never", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = store.delete("never", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let mut sink: Vec<u8> = Vec::new();
        let err = store
            .download_to("never", &mut sink, None, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

#[tokio::test]
async fn test_delete_removes_object() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        put(store.as_ref(), "a", "1").await;
        put(store.as_ref(), "b", "2").await;
        store.delete("a", &cancel).await.unwrap();
        assert_eq!(sorted_names(store.as_ref()).await, vec!["b"]);
        assert_eq!(
            store.download("a", &cancel).await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}

#[tokio::test]
async fn test_cancelled_token_fails_without_side_effects() {
    let (_dir, stores) = backends().await;
    let cancelled = CancellationToken::new();
    cancelled.cancel();
    for store in &stores {
        put(store.as_ref(), "kept", "still here").await;

        let mut body = ObjectStream::from_bytes("nope");
        let err = store
            .upload("new", &mut body, true, None, &cancelled, 0)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(body.is_released());

        let err = store.download("kept", &cancelled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let err = store.delete("kept", &cancelled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        let err = store.list(&cancelled).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        assert_eq!(sorted_names(store.as_ref()).await, vec!["kept"]);
        assert_eq!(get(store.as_ref(), "kept").await, Bytes::from("still here"));
    }
}

#[tokio::test]
async fn test_source_is_kept_unless_disposed() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        let mut body = ObjectStream::from_bytes("keep me");
        store
            .upload("x", &mut body, false, None, &cancel, 0)
            .await
            .unwrap();
        assert!(!body.is_released());
        assert!(body.next_chunk().await.is_none());
    }
}

fn recorder() -> (
    Arc<Mutex<Vec<ProgressSnapshot>>>,
    impl Fn(&ProgressSnapshot) + Send + Sync,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |s: &ProgressSnapshot| {
        sink.lock().unwrap().push(*s)
    })
}

fn assert_complete_progress(snapshots: &[ProgressSnapshot], total: u64) {
    assert!(!snapshots.is_empty());
    let mut last = 0.0;
    for s in snapshots {
        let p = s.percentage().expect("length is known");
        assert!(p > last, "percentage must increase: {p} after {last}");
        assert!(s.bytes_per_second() > 0.0);
        assert_eq!(s.expected(), total);
        last = p;
    }
    let end = snapshots.last().unwrap();
    assert_eq!(end.transferred(), total);
    assert_eq!(end.percentage(), Some(1.0));
}

#[tokio::test]
async fn test_upload_progress_for_known_length() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        let chunks: Vec<object_storage::Result<Bytes>> =
            (0..8).map(|i| Ok(Bytes::from(vec![i as u8; 100]))).collect();
        let mut body = ObjectStream::new(Box::pin(futures::stream::iter(chunks)));
        let (seen, observer) = recorder();
        store
            .upload("big", &mut body, true, Some(&observer), &cancel, 800)
            .await
            .unwrap();
        assert_complete_progress(&seen.lock().unwrap(), 800);
    }
}

#[tokio::test]
async fn test_upload_progress_uses_declared_length() {
    let store = MemoryBackend::new("u", "b");
    let cancel = CancellationToken::new();
    let mut body = ObjectStream::from_bytes(vec![0u8; 64]);
    let (seen, observer) = recorder();
    store
        .upload("x", &mut body, true, Some(&observer), &cancel, 0)
        .await
        .unwrap();
    assert_complete_progress(&seen.lock().unwrap(), 64);
}

#[tokio::test]
async fn test_upload_progress_unknown_length_completes_at_end() {
    let store = MemoryBackend::new("u", "b");
    let cancel = CancellationToken::new();
    let chunks: Vec<object_storage::Result<Bytes>> =
        vec![Ok(Bytes::from("abc")), Ok(Bytes::from("defg"))];
    let mut body = ObjectStream::new(Box::pin(futures::stream::iter(chunks)));
    let (seen, observer) = recorder();
    store
        .upload("x", &mut body, true, Some(&observer), &cancel, 0)
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    assert!(seen[0].percentage().is_none());
    assert!(seen[1].percentage().is_none());
    assert_eq!(seen[2].transferred(), 7);
    assert_eq!(seen[2].percentage(), Some(1.0));
}

#[tokio::test]
async fn test_empty_upload_reports_no_progress() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        let chunks: Vec<object_storage::Result<Bytes>> = vec![];
        let mut body = ObjectStream::new(Box::pin(futures::stream::iter(chunks)));
        let (seen, observer) = recorder();
        store
            .upload("empty", &mut body, true, Some(&observer), &cancel, 0)
            .await
            .unwrap();
        assert!(seen.lock().unwrap().is_empty());
        assert!(get(store.as_ref(), "empty").await.is_empty());
    }
}

#[tokio::test]
async fn test_download_to_sink_reports_progress() {
    let (_dir, stores) = backends().await;
    let cancel = CancellationToken::new();
    for store in &stores {
        let body = "0123456789".repeat(20);
        put(store.as_ref(), "digits", &body).await;

        let (seen, observer) = recorder();
        let mut sink: Vec<u8> = Vec::new();
        let copied = store
            .download_to("digits", &mut sink, Some(&observer), &cancel)
            .await
            .unwrap();
        assert_eq!(copied, 200);
        assert_eq!(sink, body.as_bytes());
        assert_complete_progress(&seen.lock().unwrap(), 200);
    }
}

#[tokio::test]
async fn test_identity_comparison() {
    let a = MemoryBackend::new("alice", "photos");
    let same = MemoryBackend::new("alice", "photos");
    let other_bucket = MemoryBackend::new("alice", "videos");
    let other_user = MemoryBackend::new("bob", "photos");
    assert!(a.same_store(&same));
    assert!(!a.same_store(&other_bucket));
    assert!(!a.same_store(&other_user));
}
