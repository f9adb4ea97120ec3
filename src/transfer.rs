//! Bulk operations built purely from [`Backend`] primitives.
//!
//! Both operations walk a listing snapshot one object at a time. A failing
//! object is recorded and skipped; it never stops the rest of the batch.

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::common::Backend;
use crate::error::{Result, StorageError};

/// Where in the per-object pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Reading from the source failed. Nothing changed.
    Download,
    /// Writing to the destination failed. The destination may hold a previous
    /// version of the object but never a partial one.
    Upload,
    /// The copy succeeded but removing the source failed; the object now
    /// exists in both stores.
    DeleteSource,
    /// A delete issued by [`delete_all`] failed.
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Download => "download",
            Stage::Upload => "upload",
            Stage::DeleteSource => "delete source",
            Stage::Delete => "delete",
        })
    }
}

/// Failure of a single object inside a bulk operation.
#[derive(Debug)]
pub struct ItemFailure {
    /// Object name.
    pub name: String,
    /// Pipeline stage that failed.
    pub stage: Stage,
    /// The underlying error.
    pub error: StorageError,
}

impl ItemFailure {
    fn new(name: &str, stage: Stage, error: StorageError) -> Self {
        Self {
            name: name.to_string(),
            stage,
            error,
        }
    }

    /// True when the destination already received the object.
    pub fn copied(&self) -> bool {
        self.stage == Stage::DeleteSource
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed for '{}': {}", self.stage, self.name, self.error)
    }
}

/// Per-object callbacks for [`transfer`]. Both default to no-ops.
pub trait TransferObserver: Send + Sync {
    /// The object was copied, and removed from the source if requested.
    fn on_success(&self, _name: &str) {}

    /// The object failed at `failure.stage`.
    fn on_error(&self, _failure: &ItemFailure) {}
}

impl TransferObserver for () {}

/// What a [`transfer`] call did.
#[derive(Debug, Default)]
pub struct TransferSummary {
    /// Number of names in the source listing.
    pub listed: usize,
    /// Objects fully processed, in processing order.
    pub succeeded: Vec<String>,
    /// Objects that failed, in processing order.
    pub failures: Vec<ItemFailure>,
    /// The loop stopped early because the token fired.
    pub cancelled: bool,
    /// Source and destination are the same store; nothing was touched.
    pub skipped_same_store: bool,
}

impl TransferSummary {
    /// Every listed object succeeded and the run was not cut short.
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failures.is_empty() && self.succeeded.len() == self.listed
    }
}

/// What a [`delete_all`] call did.
#[derive(Debug, Default)]
pub struct DeleteAllSummary {
    /// Number of names in the listing.
    pub listed: usize,
    /// Objects deleted.
    pub deleted: u64,
    /// Objects whose delete failed.
    pub failures: Vec<ItemFailure>,
    /// The loop stopped early because the token fired.
    pub cancelled: bool,
}

/// Lists `store` and deletes every object sequentially.
///
/// Cancellation is checked before each delete; objects already deleted stay
/// deleted. Errors from the listing itself are returned, per-object errors
/// are collected in the summary.
pub async fn delete_all<B>(
    store: &B,
    on_deleted: Option<&(dyn Fn(u64) + Send + Sync)>,
    cancel: &CancellationToken,
) -> Result<DeleteAllSummary>
where
    B: Backend + ?Sized,
{
    let names = store.list(cancel).await?;
    let mut summary = DeleteAllSummary {
        listed: names.len(),
        ..Default::default()
    };

    for name in &names {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        match store.delete(name, cancel).await {
            Ok(()) => {
                summary.deleted += 1;
                debug!(store = %store.identity(), name = %name, "deleted");
                if let Some(observer) = on_deleted {
                    observer(summary.deleted);
                }
            }
            Err(error) => {
                let failure = ItemFailure::new(name, Stage::Delete, error);
                warn!(store = %store.identity(), "{}", failure);
                summary.failures.push(failure);
            }
        }
    }

    info!(
        store = %store.identity(),
        listed = summary.listed,
        deleted = summary.deleted,
        failed = summary.failures.len(),
        cancelled = summary.cancelled,
        "delete all finished"
    );
    Ok(summary)
}

/// Copies every object of `source` into `destination`, removing each from
/// the source after a successful copy when `delete_source` is set.
///
/// * A destination with the same identity as the source is a no-op: no
///   listing, copy or delete is issued.
/// * The source is listed once; objects added afterwards may be missed.
/// * Objects are processed one at a time in listing order. Cancellation is
///   checked before each object and stops the loop.
/// * A failed download or upload is reported through
///   [`TransferObserver::on_error`] and the loop moves on. A failed source
///   delete is reported with [`Stage::DeleteSource`] and the object is not
///   reported as a success; it remains in both stores.
pub async fn transfer<S, D>(
    source: &S,
    destination: &D,
    delete_source: bool,
    observer: &dyn TransferObserver,
    cancel: &CancellationToken,
) -> Result<TransferSummary>
where
    S: Backend + ?Sized,
    D: Backend + ?Sized,
{
    if source.identity() == destination.identity() {
        debug!(store = %source.identity(), "transfer to the same store skipped");
        return Ok(TransferSummary {
            skipped_same_store: true,
            ..Default::default()
        });
    }

    let names = source.list(cancel).await?;
    let mut summary = TransferSummary {
        listed: names.len(),
        ..Default::default()
    };

    for name in names {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }

        if let Err(failure) = copy_object(source, destination, &name, cancel).await {
            warn!(from = %source.identity(), to = %destination.identity(), "{}", failure);
            observer.on_error(&failure);
            summary.failures.push(failure);
            continue;
        }

        if delete_source {
            if let Err(error) = source.delete(&name, cancel).await {
                let failure = ItemFailure::new(&name, Stage::DeleteSource, error);
                warn!(from = %source.identity(), "{}", failure);
                observer.on_error(&failure);
                summary.failures.push(failure);
                continue;
            }
        }

        debug!(
            from = %source.identity(),
            to = %destination.identity(),
            name = %name,
            "transferred"
        );
        observer.on_success(&name);
        summary.succeeded.push(name);
    }

    info!(
        from = %source.identity(),
        to = %destination.identity(),
        listed = summary.listed,
        succeeded = summary.succeeded.len(),
        failed = summary.failures.len(),
        cancelled = summary.cancelled,
        "transfer finished"
    );
    Ok(summary)
}

async fn copy_object<S, D>(
    source: &S,
    destination: &D,
    name: &str,
    cancel: &CancellationToken,
) -> Result<(), ItemFailure>
where
    S: Backend + ?Sized,
    D: Backend + ?Sized,
{
    let mut stream = source
        .download(name, cancel)
        .await
        .map_err(|e| ItemFailure::new(name, Stage::Download, e))?;
    destination
        .upload(name, &mut stream, true, None, cancel, 0)
        .await
        .map_err(|e| ItemFailure::new(name, Stage::Upload, e))
}
