//! Download coordination.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use http::{Method, StatusCode};
use stowline_core::{Endpoints, ObjectHandle, ObjectMetadata, TransferConfig, ValidationMode};
use tracing::{debug, info, warn};

use crate::checksums::{self, StreamingValidator};
use crate::error::{ExchangeError, TransferError, TransferResult};
use crate::request::{AuthorizedRequestFactory, ByteStream, RequestBody};

/// Entry point for downloads.
#[derive(Clone)]
pub struct DownloadCoordinator {
    endpoints: Endpoints,
    validate: bool,
    factory: Arc<dyn AuthorizedRequestFactory>,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("endpoints", &self.endpoints)
            .field("validate", &self.validate)
            .finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    /// Create a coordinator sending requests through `factory`.
    #[must_use]
    pub fn new(config: &TransferConfig, factory: Arc<dyn AuthorizedRequestFactory>) -> Self {
        Self {
            endpoints: Endpoints::new(config.endpoint.as_str()),
            validate: config.validate_downloads,
            factory,
        }
    }

    /// Open a readable stream over the contents of `object`.
    ///
    /// Returns immediately. The metadata request is issued on first poll; if
    /// it fails, the error is the first item and no media request is made.
    #[must_use]
    pub fn open_download_stream(&self, object: ObjectHandle) -> DownloadStream {
        let this = self.clone();
        let start = async move {
            let metadata = this.fetch_metadata(&object).await?;
            this.open_media(object, metadata).await
        };
        DownloadStream {
            inner: stream::once(start).try_flatten().boxed(),
        }
    }

    /// Download the whole object into memory.
    pub async fn download_bytes(&self, object: ObjectHandle) -> TransferResult<Bytes> {
        let mut stream = self.open_download_stream(object);
        let mut buf = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    async fn fetch_metadata(&self, object: &ObjectHandle) -> TransferResult<ObjectMetadata> {
        let transfer_error = |source: ExchangeError| TransferError::Transfer {
            object: object.to_string(),
            source,
        };

        let request = http::Request::builder()
            .method(Method::GET)
            .uri(self.endpoints.object_url(object))
            .body(RequestBody::Empty)
            .map_err(|e| transfer_error(e.into()))?;
        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| transfer_error(e.into()))?;

        let status = response.status();
        if !status.is_success() {
            let source = ExchangeError::from_response(response).await;
            warn!(object = %object, %status, "metadata request failed");
            if status == StatusCode::NOT_FOUND {
                return Err(TransferError::NotFound {
                    object: object.to_string(),
                    source,
                });
            }
            return Err(transfer_error(source));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| transfer_error(ExchangeError::Body(e)))?;
        serde_json::from_slice(&body).map_err(|e| {
            transfer_error(ExchangeError::Malformed(format!(
                "invalid object resource: {e}"
            )))
        })
    }

    async fn open_media(
        &self,
        object: ObjectHandle,
        metadata: ObjectMetadata,
    ) -> TransferResult<BoxStream<'static, TransferResult<Bytes>>> {
        let url = metadata
            .media_link
            .clone()
            .unwrap_or_else(|| self.endpoints.media_url(&object));
        debug!(object = %object, url = %url, "reading object media");

        let request = http::Request::builder()
            .method(Method::GET)
            .uri(url)
            .body(RequestBody::Empty)
            .map_err(|e| TransferError::Transfer {
                object: object.to_string(),
                source: e.into(),
            })?;
        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| TransferError::Transfer {
                object: object.to_string(),
                source: e.into(),
            })?;
        if !response.status().is_success() {
            let source = ExchangeError::from_response(response).await;
            return Err(TransferError::Transfer {
                object: object.to_string(),
                source,
            });
        }

        let encoded = response
            .headers()
            .contains_key(http::header::CONTENT_ENCODING);
        let expected = if !self.validate {
            None
        } else if encoded {
            // Transcoded bodies never match the stored object's digests.
            debug!(object = %object, "content-encoded response, skipping validation");
            None
        } else {
            expected_digest(&metadata)
        };
        if self.validate && expected.is_none() && !encoded {
            warn!(object = %object, "server reported no checksum, skipping validation");
        }

        Ok(ValidatedBody::new(object, response.into_body().into_stream(), expected).into_stream())
    }
}

/// The digest to check a download against: CRC32C when reported, else MD5.
fn expected_digest(metadata: &ObjectMetadata) -> Option<(ValidationMode, String)> {
    [ValidationMode::Crc32c, ValidationMode::Md5]
        .into_iter()
        .find_map(|mode| checksums::server_digest(mode, metadata).map(|d| (mode, d.to_owned())))
}

/// Body stream that hashes bytes as they pass and checks the digest at the end.
struct ValidatedBody {
    object: ObjectHandle,
    body: ByteStream,
    check: Option<(StreamingValidator, String)>,
    done: bool,
}

impl ValidatedBody {
    fn new(object: ObjectHandle, body: ByteStream, expected: Option<(ValidationMode, String)>) -> Self {
        Self {
            object,
            body,
            check: expected.map(|(mode, digest)| (StreamingValidator::new(mode), digest)),
            done: false,
        }
    }

    async fn next_chunk(&mut self) -> Option<TransferResult<Bytes>> {
        if self.done {
            return None;
        }
        match self.body.next().await {
            Some(Ok(chunk)) => {
                if let Some((validator, _)) = &mut self.check {
                    validator.update(&chunk);
                }
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(TransferError::Transfer {
                    object: self.object.to_string(),
                    source: ExchangeError::Body(e),
                }))
            }
            None => {
                self.done = true;
                self.verify().err().map(Err)
            }
        }
    }

    fn verify(&mut self) -> TransferResult<()> {
        let Some((validator, server)) = self.check.take() else {
            return Ok(());
        };
        let mode = validator.mode();
        let bytes = validator.bytes_seen();
        let Some(local) = validator.finish() else {
            return Ok(());
        };
        if checksums::matches(mode, &local, &server) {
            info!(object = %self.object, bytes, %mode, "download verified");
            return Ok(());
        }
        let server = checksums::normalize_server_digest(&server).to_owned();
        warn!(object = %self.object, %mode, local = %local, server = %server, "download checksum mismatch");
        Err(TransferError::DownloadMismatch {
            object: self.object.to_string(),
            mode,
            local,
            server,
        })
    }

    fn into_stream(self) -> BoxStream<'static, TransferResult<Bytes>> {
        stream::unfold(self, |mut body| async move {
            body.next_chunk().await.map(|item| (item, body))
        })
        .boxed()
    }
}

/// Readable end of a download.
pub struct DownloadStream {
    inner: BoxStream<'static, TransferResult<Bytes>>,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DownloadStream")
    }
}

impl Stream for DownloadStream {
    type Item = TransferResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}
