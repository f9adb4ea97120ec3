//! AWS S3 backend.

use std::sync::Arc;

use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backends::common::{check_cancelled, Backend, BackendIdentity, ObjectStream};
use crate::classify::ErrorClassifier;
use crate::error::{ErrorKind, Result, StorageError};
use crate::progress::{ProgressObserver, ProgressTracker};
use crate::retry::retry_transient;

const PART_SIZE: usize = 5 * 1024 * 1024; // 5MB, the S3 minimum part size

/// Stores objects in one S3 bucket.
///
/// Bodies smaller than one part go through a single `PutObject`; larger ones
/// use a multipart upload that is aborted on failure, so a failed upload never
/// leaves a visible object behind.
pub struct S3Backend {
    client: Arc<S3Client>,
    bucket: String,
    identity: BackendIdentity,
    max_retries: usize,
}

impl S3Backend {
    /// Creates a backend for `bucket` acting as `principal`.
    pub fn new(
        client: Arc<S3Client>,
        bucket: impl Into<String>,
        principal: impl Into<String>,
    ) -> Self {
        let bucket = bucket.into();
        Self {
            client,
            identity: BackendIdentity::new(principal, bucket.clone()),
            bucket,
            max_retries: 3,
        }
    }

    /// Retries for transient listing failures.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    async fn upload_parts(
        &self,
        name: &str,
        upload_id: &str,
        mut buffer: Vec<u8>,
        source: &mut ObjectStream,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = vec![];
        let mut part_number: i32 = 1;
        let mut eof = false;
        loop {
            while !eof && buffer.len() < PART_SIZE {
                match source.next_chunk().await {
                    Some(chunk) => buffer.extend_from_slice(&chunk?),
                    None => eof = true,
                }
            }
            if buffer.is_empty() {
                break;
            }
            check_cancelled(cancel)?;
            let rest = buffer.split_off(buffer.len().min(PART_SIZE));
            let part = std::mem::replace(&mut buffer, rest);
            let size = part.len() as u64;
            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(name)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(S3Body::from(part))
                .send()
                .await
                .map_err(|e| map_sdk_error(&format!("upload part {part_number} of '{name}'"), e))?;
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            tracker.advance(size);
            part_number += 1;
        }
        Ok(parts)
    }

    async fn put_multipart(
        &self,
        name: &str,
        first: Vec<u8>,
        source: &mut ObjectStream,
        tracker: &mut ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("start upload of '{name}'"), e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::internal("S3 returned no multipart upload id"))?
            .to_string();

        let result = match self
            .upload_parts(name, &upload_id, first, source, tracker, cancel)
            .await
        {
            Ok(parts) => self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(name)
                .upload_id(&upload_id)
                .multipart_upload(
                    CompletedMultipartUpload::builder()
                        .set_parts(Some(parts))
                        .build(),
                )
                .send()
                .await
                .map(|_| ())
                .map_err(|e| map_sdk_error(&format!("complete upload of '{name}'"), e)),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(name)
                .upload_id(&upload_id)
                .send()
                .await
            {
                warn!(
                    upload_id = %upload_id,
                    "failed to abort multipart upload: {}",
                    DisplayErrorContext(&e)
                );
            }
        }
        result
    }
}

/// Converts an SDK failure into a classified [`StorageError`].
fn map_sdk_error<E>(context: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let kind = match &err {
        SdkError::TimeoutError(_) => ErrorKind::Timeout,
        SdkError::DispatchFailure(failure) if failure.is_timeout() => ErrorKind::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => ErrorKind::TemporaryFailure,
        SdkError::ConstructionFailure(_) => ErrorKind::InvalidArgument,
        _ => ErrorClassifier::default().classify_response(
            err.as_service_error().and_then(|e| e.code()),
            err.raw_response().map(|r| r.status().as_u16()),
        ),
    };
    let message = format!("{context}: {}", DisplayErrorContext(&err));
    StorageError::new(kind, message).with_source(err)
}

#[async_trait::async_trait]
impl Backend for S3Backend {
    fn identity(&self) -> &BackendIdentity {
        &self.identity
    }

    #[instrument(skip(self, cancel), fields(bucket = %self.bucket))]
    async fn list(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut names = vec![];
        let mut continuation_token: Option<String> = None;
        loop {
            check_cancelled(cancel)?;
            let page = retry_transient(self.max_retries, "list_objects_v2", cancel, || {
                let mut req = self.client.list_objects_v2().bucket(&self.bucket);
                if let Some(token) = &continuation_token {
                    req = req.continuation_token(token);
                }
                async move {
                    req.send()
                        .await
                        .map_err(|e| map_sdk_error("list objects", e))
                }
            })
            .await?;
            names.extend(
                page.contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .map(str::to_string),
            );
            continuation_token = page.next_continuation_token().map(str::to_string);
            if continuation_token.is_none() {
                break;
            }
        }
        debug!(count = names.len(), "listed");
        Ok(names)
    }

    #[instrument(skip(self, cancel), fields(bucket = %self.bucket))]
    async fn download(&self, name: &str, cancel: &CancellationToken) -> Result<ObjectStream> {
        check_cancelled(cancel)?;
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("get '{name}'"), e))?;
        let length = resp.content_length().and_then(|l| u64::try_from(l).ok());
        let reader = resp.body.into_async_read();
        let stream = ReaderStream::new(reader).map(|chunk| chunk.map_err(StorageError::from));
        Ok(match length {
            Some(length) => ObjectStream::with_length(Box::pin(stream), length),
            None => ObjectStream::new(Box::pin(stream)),
        })
    }

    #[instrument(skip(self, source, progress, cancel), fields(bucket = %self.bucket))]
    async fn put(
        &self,
        name: &str,
        source: &mut ObjectStream,
        expected_length: u64,
        progress: Option<&dyn ProgressObserver>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        let mut tracker = ProgressTracker::new(expected_length, progress);
        let mut buffer = Vec::new();
        let mut eof = false;
        while buffer.len() < PART_SIZE {
            match source.next_chunk().await {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => {
                    eof = true;
                    break;
                }
            }
        }
        check_cancelled(cancel)?;

        if eof {
            let size = buffer.len() as u64;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(name)
                .content_length(size as i64)
                .body(S3Body::from(buffer))
                .send()
                .await
                .map_err(|e| map_sdk_error(&format!("put '{name}'"), e))?;
            tracker.advance(size);
        } else {
            self.put_multipart(name, buffer, source, &mut tracker, cancel)
                .await?;
        }
        tracker.finish();
        debug!(bytes = tracker.transferred(), "stored");
        Ok(())
    }

    #[instrument(skip(self, cancel), fields(bucket = %self.bucket))]
    async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        check_cancelled(cancel)?;
        // DeleteObject succeeds for missing keys, so probe first.
        self.client
            .head_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("head '{name}'"), e))?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(name)
            .send()
            .await
            .map_err(|e| map_sdk_error(&format!("delete '{name}'"), e))?;
        Ok(())
    }
}
