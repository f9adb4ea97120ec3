#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

//! An async object storage facade over the local filesystem, an in-memory store
//! and AWS S3, with safe migration of data between any two of them.
//! Store URIs use prefixes: `file:///path`, `mem://principal/bucket`, `s3://bucket`.
//!
//! # Features
//! - One [`Backend`] contract; every adapter exposes list/download/upload/delete.
//! - Bulk operations ([`Backend::delete_all`], [`Backend::transfer_to`]) built from
//!   those primitives, tolerant of per-object failures.
//! - Uniform progress reporting through [`ProgressSnapshot`].
//! - Every failure classified into a small, stable [`ErrorKind`] set.
//! - Cooperative cancellation with [`CancellationToken`].
//!
//! # Usage
//! ```no_run
//! use object_storage::{Backend, CancellationToken, Config, ObjectStorage, ObjectStream};
//!
//! # async fn run() -> object_storage::Result<()> {
//! let storage = ObjectStorage::new(Config::default()).await?;
//! let cancel = CancellationToken::new();
//!
//! let source = storage.open("file:///var/data/export").await?;
//! let mut body = ObjectStream::from_bytes("hello");
//! source.upload("greeting.txt", &mut body, true, None, &cancel, 0).await?;
//!
//! // Move everything into S3, pruning the local copy.
//! let summary = storage
//!     .migrate("file:///var/data/export", "s3://archive", true, &(), &cancel)
//!     .await?;
//! for failure in &summary.failures {
//!     eprintln!("{failure}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod classify;
mod error;
mod object_storage;
pub mod progress;
pub mod retry;
pub mod transfer;

pub use backends::common::{check_cancelled, Backend, BackendIdentity, ByteStream, ObjectStream};
pub use backends::local::LocalBackend;
pub use backends::memory::MemoryBackend;
#[cfg(feature = "s3")]
pub use backends::s3::S3Backend;
pub use classify::{Condition, ErrorClassifier};
pub use error::{ErrorKind, Result, StorageError};
pub use object_storage::{ObjectStorage, StorageUri};
pub use progress::{ProgressObserver, ProgressSnapshot, ProgressTranslator};
pub use tokio_util::sync::CancellationToken;
pub use transfer::{
    DeleteAllSummary, ItemFailure, Stage, TransferObserver, TransferSummary,
};

/// Configuration for [`ObjectStorage`].
#[derive(Debug, Clone)]
pub struct Config {
    /// Optional S3 region (defaults to environment if unset).
    pub s3_region: Option<String>,
    /// Custom S3 endpoint, for S3 compatible services.
    pub s3_endpoint: Option<String>,
    /// Use path-style bucket addressing.
    pub s3_force_path_style: bool,
    /// Principal recorded in S3 backend identities (defaults to `"default"`).
    pub s3_principal: Option<String>,
    /// Retries for transient failures in adapters that retry.
    pub max_retries: usize,
    /// Download chunk size for `mem://` stores.
    pub memory_chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            s3_region: None,
            s3_endpoint: None,
            s3_force_path_style: false,
            s3_principal: None,
            max_retries: 3,
            memory_chunk_size: 64 * 1024,
        }
    }
}
