//! Local filesystem backend.

use std::path::{Component, Path, PathBuf};

use futures::StreamExt;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::backends::common::{check_cancelled, Backend, BackendIdentity, ObjectStream};
use crate::error::{ErrorKind, Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};

/// Directory under the root that holds in-flight uploads. Never listed.
const STAGING_DIR: &str = ".staging";

/// Principal used for every local store.
pub const LOCAL_PRINCIPAL: &str = "local";

/// Stores objects as files under a root directory.
///
/// Object names map onto relative paths; `/` separates path segments. Uploads
/// are written to a uniquely named staging file and renamed into place, so
/// readers never see a partial object. Any number of handles, in any number of
/// processes, may share one root.
pub struct LocalBackend {
    root: PathBuf,
    identity: BackendIdentity,
}

impl LocalBackend {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        tokio::fs::create_dir_all(root.as_ref()).await?;
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        let identity = BackendIdentity::new(LOCAL_PRINCIPAL, root.to_string_lossy());
        Ok(Self { root, identity })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(StorageError::invalid_argument("object name is empty"));
        }
        if name.contains('\\') || name.contains('\0') {
            return Err(StorageError::invalid_argument(format!(
                "object name '{name}' contains a forbidden character"
            )));
        }
        let relative = Path::new(name);
        let mut segments = 0;
        for component in relative.components() {
            match component {
                Component::Normal(segment) => {
                    if segments == 0 && segment == STAGING_DIR {
                        return Err(StorageError::invalid_argument(format!(
                            "object name '{name}' uses a reserved prefix"
                        )));
                    }
                    segments += 1;
                }
                _ => {
                    return Err(StorageError::invalid_argument(format!(
                        "object name '{name}' must be a plain relative path"
                    )))
                }
            }
        }
        if name.ends_with('/') || name.split('/').any(|s| s.is_empty() || s == ".") {
            return Err(StorageError::invalid_argument(format!(
                "object name '{name}' has an empty segment"
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Creates an empty staging file. The name is random and created
    /// exclusively; dropping the returned path removes the file.
    async fn stage(&self) -> Result<(tokio::fs::File, TempPath)> {
        let dir = self.root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&dir).await?;
        let (file, path) = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".partial")
            .tempfile_in(&dir)?
            .into_parts();
        Ok((tokio::fs::File::from_std(file), path))
    }

    async fn commit(&self, name: &str, staging: TempPath, target: &Path) -> Result<()> {
        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let is_dir = tokio::fs::metadata(target)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            return Err(StorageError::new(
                ErrorKind::InvalidArgument,
                format!("object name '{name}' collides with a directory"),
            ));
        }
        tokio::fs::rename(&staging, target).await?;
        // the name now belongs to the committed object
        staging.keep().map_err(|e| StorageError::from(e.error))?;
        Ok(())
    }

    async fn write_staged(
        &self,
        mut file: tokio::fs::File,
        source: &mut ObjectStream,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        while let Some(chunk) = source.next_chunk().await {
            check_cancelled(cancel)?;
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            tracker.advance(chunk.len() as u64);
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }
}

fn missing_as_not_found(name: &str, err: std::io::Error) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::not_found(name).with_source(err)
    } else {
        err.into()
    }
}

#[async_trait::async_trait]
impl Backend for LocalBackend {
    fn identity(&self) -> &BackendIdentity {
        &self.identity
    }

    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        let root = self.root.clone();
        let cancel = cancel.clone();
        let names = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let mut names = vec![];
            let walker = WalkDir::new(&root)
                .follow_links(false)
                .min_depth(1)
                .into_iter()
                .filter_entry(|e| !(e.depth() == 1 && e.file_name() == STAGING_DIR));
            for entry in walker {
                check_cancelled(&cancel)?;
                let entry = entry.map_err(|e| {
                    let message = e.to_string();
                    match e.into_io_error() {
                        Some(io) => StorageError::from(io),
                        None => StorageError::internal(message),
                    }
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&root)
                    .map_err(|e| StorageError::internal(e.to_string()))?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                names.push(name);
            }
            Ok(names)
        })
        .await??;
        debug!(count = names.len(), "listed");
        Ok(names)
    }

    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    async fn download(&self, name: &str, cancel: &CancellationToken) -> Result<ObjectStream> {
        check_cancelled(cancel)?;
        let path = self.path_for(name)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| missing_as_not_found(name, e))?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(StorageError::not_found(name));
        }
        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(StorageError::from));
        Ok(ObjectStream::with_length(Box::pin(stream), meta.len()))
    }

    #[instrument(skip(self, source, progress, cancel), fields(root = %self.root.display()))]
    async fn put(
        &self,
        name: &str,
        source: &mut ObjectStream,
        expected_length: u64,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let target = self.path_for(name)?;
        let (file, staging) = self.stage().await?;

        let mut tracker = ProgressTracker::new(expected_length, progress);
        let result = match self.write_staged(file, source, &mut tracker, cancel).await {
            Ok(()) => self.commit(name, staging, &target).await,
            // dropping `staging` removes the partial file
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(error = %e, "upload aborted");
            return Err(e);
        }
        tracker.finish();
        debug!(bytes = tracker.transferred(), "stored");
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(root = %self.root.display()))]
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        let path = self.path_for(name)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| missing_as_not_found(name, e))?;
        if !meta.is_file() {
            return Err(StorageError::not_found(name));
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| missing_as_not_found(name, e))
    }
}
