use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::backends::common::{Backend, BackendIdentity};
use crate::backends::local::LocalBackend;
use crate::backends::memory::MemoryBackend;
use crate::error::{Result, StorageError};
use crate::transfer::{TransferObserver, TransferSummary};
use crate::Config;

#[cfg(feature = "s3")]
use crate::backends::s3::S3Backend;
#[cfg(feature = "s3")]
use aws_config::meta::region::RegionProviderChain;
#[cfg(feature = "s3")]
use aws_sdk_s3::Client as S3Client;

/// A parsed storage location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageUri {
    /// `file:///path/to/root`
    File(PathBuf),
    /// `mem://principal/bucket`
    Memory {
        /// Principal part of the identity.
        principal: String,
        /// Bucket part of the identity.
        bucket: String,
    },
    /// `s3://bucket`
    S3 {
        /// Bucket name.
        bucket: String,
    },
}

impl StorageUri {
    /// Parses a store URI. The URI names a whole store, never an object.
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(path) = uri.strip_prefix("file://") {
            if path.is_empty() {
                return Err(StorageError::invalid_argument("file URI has no path"));
            }
            Ok(StorageUri::File(PathBuf::from(path)))
        } else if let Some(after) = uri.strip_prefix("mem://") {
            match after.trim_end_matches('/').split_once('/') {
                Some((principal, bucket))
                    if !principal.is_empty() && !bucket.is_empty() && !bucket.contains('/') =>
                {
                    Ok(StorageUri::Memory {
                        principal: principal.to_string(),
                        bucket: bucket.to_string(),
                    })
                }
                _ => Err(StorageError::invalid_argument(format!(
                    "expected mem://principal/bucket, got '{uri}'"
                ))),
            }
        } else if let Some(after) = uri.strip_prefix("s3://") {
            let bucket = after.trim_end_matches('/');
            if bucket.is_empty() || bucket.contains('/') {
                return Err(StorageError::invalid_argument(format!(
                    "expected s3://bucket, got '{uri}'"
                )));
            }
            Ok(StorageUri::S3 {
                bucket: bucket.to_string(),
            })
        } else {
            Err(StorageError::invalid_argument(
                "Invalid URI prefix. Use 'file://', 'mem://', or 's3://'",
            ))
        }
    }
}

/// Opens backends from URIs and moves data between them.
#[derive(Clone)]
pub struct ObjectStorage {
    config: Config,
    #[cfg(feature = "s3")]
    s3_client: Option<Arc<S3Client>>,
    memory: Arc<Mutex<HashMap<BackendIdentity, Arc<MemoryBackend>>>>,
}

impl ObjectStorage {
    /// Creates a storage client.
    ///
    /// An S3 client is only built when a region or endpoint is configured or
    /// `AWS_REGION` is set.
    #[instrument]
    pub async fn new(config: Config) -> Result<Self> {
        #[cfg(feature = "s3")]
        let s3_client = Self::build_s3_client(&config).await;

        Ok(Self {
            config,
            #[cfg(feature = "s3")]
            s3_client,
            memory: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    #[cfg(feature = "s3")]
    async fn build_s3_client(config: &Config) -> Option<Arc<S3Client>> {
        if config.s3_region.is_none()
            && config.s3_endpoint.is_none()
            && std::env::var("AWS_REGION").is_err()
        {
            return None;
        }
        let region_provider = RegionProviderChain::first_try(
            config
                .s3_region
                .clone()
                .map(aws_sdk_s3::config::Region::new),
        )
        .or_default_provider()
        .or_else(aws_sdk_s3::config::Region::new("us-east-1"));
        let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(region_provider)
            .load()
            .await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.s3_force_path_style);
        if let Some(endpoint) = &config.s3_endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Some(Arc::new(S3Client::from_conf(builder.build())))
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Opens the store named by `uri`.
    ///
    /// `mem://` stores live as long as this client: opening the same URI
    /// twice yields the same store.
    #[instrument(skip(self))]
    pub async fn open(&self, uri: &str) -> Result<Arc<dyn Backend>> {
        match StorageUri::parse(uri)? {
            StorageUri::File(root) => Ok(Arc::new(LocalBackend::new(root).await?)),
            StorageUri::Memory { principal, bucket } => {
                let identity = BackendIdentity::new(principal.clone(), bucket.clone());
                let mut stores = self.memory.lock().unwrap_or_else(PoisonError::into_inner);
                let store = stores.entry(identity).or_insert_with(|| {
                    Arc::new(
                        MemoryBackend::new(principal, bucket)
                            .with_chunk_size(self.config.memory_chunk_size),
                    )
                });
                Ok(store.clone())
            }
            StorageUri::S3 { bucket } => self.open_s3(bucket),
        }
    }

    #[cfg(feature = "s3")]
    fn open_s3(&self, bucket: String) -> Result<Arc<dyn Backend>> {
        let client = self
            .s3_client
            .as_ref()
            .ok_or_else(|| StorageError::invalid_argument("S3 client not configured"))?
            .clone();
        let principal = self
            .config
            .s3_principal
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Ok(Arc::new(
            S3Backend::new(client, bucket, principal).with_max_retries(self.config.max_retries),
        ))
    }

    #[cfg(not(feature = "s3"))]
    fn open_s3(&self, _bucket: String) -> Result<Arc<dyn Backend>> {
        Err(StorageError::invalid_argument(
            "built without S3 support (enable the `s3` feature)",
        ))
    }

    /// Transfers every object from the `source` store into `destination`.
    /// See [`crate::transfer::transfer`].
    #[instrument(skip(self, observer, cancel))]
    pub async fn migrate(
        &self,
        source: &str,
        destination: &str,
        delete_source: bool,
        observer: &dyn TransferObserver,
        cancel: &CancellationToken,
    ) -> Result<TransferSummary> {
        let from = self.open(source).await?;
        let to = self.open(destination).await?;
        from.transfer_to(to.as_ref(), delete_source, observer, cancel)
            .await
    }
}
