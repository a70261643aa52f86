//! The transfer session state machine.
//!
//! A session owns one upload attempt. Its life is a sequence of [`Phase`]s:
//!
//! ```text
//!              record found
//! Negotiating ───────────────> Querying ──308──> Sending ──2xx──> Verifying ──> Done
//!      │  initiated (offset 0)     │                 ^                ^
//!      └───────────────────────────┼─────────────────┘                │
//!                                  └────────2xx (already complete)────┘
//! Posting (simple upload) ──2xx──> Verifying
//!
//! Any phase other than Done ──error──> Failed
//! ```
//!
//! [`Phase::advance`] is the pure transition function. The session driver
//! performs the I/O each phase calls for and feeds the outcome back in as a
//! [`SessionEvent`].

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use parking_lot::Mutex;
use stowline_core::{Endpoints, ObjectHandle, ObjectMetadata, TransferOptions, UploadType};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::checksums::{self, StreamingValidator};
use crate::error::{ExchangeError, TransferError, TransferResult};
use crate::input::UploadInput;
use crate::request::{AuthorizedRequestFactory, RequestBody, ResponseBody};
use crate::session_store::{SessionRecord, SessionStore};

/// `308 Resume Incomplete`, the resumable protocol's progress status.
pub const RESUME_INCOMPLETE: StatusCode = StatusCode::PERMANENT_REDIRECT;

/// Header carrying the declared content type at session initiation.
pub const X_UPLOAD_CONTENT_TYPE: &str = "x-upload-content-type";

/// Phase of a transfer session.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    /// Looking up or creating the resumable session.
    Negotiating,
    /// Asking the server how many bytes of an existing session it holds.
    Querying {
        /// Resume URI.
        uri: String,
    },
    /// Streaming the payload to the session from `offset`.
    Sending {
        /// Resume URI.
        uri: String,
        /// First byte the server has not confirmed.
        offset: u64,
    },
    /// Sending a simple (single-request) upload.
    Posting,
    /// Comparing local and server checksums.
    Verifying {
        /// Final object metadata reported by the server.
        metadata: ObjectMetadata,
    },
    /// Upload finished and validated.
    Done {
        /// Final object metadata.
        metadata: ObjectMetadata,
    },
    /// Terminal failure.
    Failed,
}

/// Outcome of the I/O performed in a phase.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A persisted session exists for the object.
    Resume {
        /// Persisted resume URI.
        uri: String,
    },
    /// A new session was created and persisted.
    Negotiated {
        /// Resume URI from the `Location` header.
        uri: String,
    },
    /// The server confirmed all bytes before `next`.
    OffsetConfirmed {
        /// Resume offset.
        next: u64,
    },
    /// The resume query showed the upload had already completed.
    AlreadyComplete {
        /// Final object metadata from the query response.
        metadata: ObjectMetadata,
    },
    /// The payload request completed.
    Uploaded {
        /// Final object metadata.
        metadata: ObjectMetadata,
    },
    /// Local and server digests agree, or validation is off.
    Verified,
    /// The phase failed.
    Failed,
}

impl Phase {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Failed)
    }

    /// Short phase name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Negotiating => "negotiating",
            Self::Querying { .. } => "querying",
            Self::Sending { .. } => "sending",
            Self::Posting => "posting",
            Self::Verifying { .. } => "verifying",
            Self::Done { .. } => "done",
            Self::Failed => "failed",
        }
    }

    /// Transition function.
    ///
    /// `Done` and `Failed` absorb every event. Any event that is not valid in
    /// the current phase leads to `Failed`.
    #[must_use]
    pub fn advance(self, event: SessionEvent) -> Self {
        match (self, event) {
            (done @ Self::Done { .. }, _) => done,
            (Self::Failed, _) | (_, SessionEvent::Failed) => Self::Failed,
            (Self::Negotiating, SessionEvent::Resume { uri }) => Self::Querying { uri },
            (Self::Negotiating, SessionEvent::Negotiated { uri }) => {
                Self::Sending { uri, offset: 0 }
            }
            (Self::Querying { uri }, SessionEvent::OffsetConfirmed { next }) => {
                Self::Sending { uri, offset: next }
            }
            (Self::Querying { .. }, SessionEvent::AlreadyComplete { metadata })
            | (Self::Sending { .. } | Self::Posting, SessionEvent::Uploaded { metadata }) => {
                Self::Verifying { metadata }
            }
            (Self::Verifying { metadata }, SessionEvent::Verified) => Self::Done { metadata },
            _ => Self::Failed,
        }
    }
}

/// Parse the end of a `Range: bytes=0-<last>` header into the resume offset.
#[must_use]
pub fn parse_resume_offset(range: &str) -> Option<u64> {
    let ranges = range.trim().strip_prefix("bytes=")?;
    let (_, last) = ranges.split_once('-')?;
    last.trim().parse::<u64>().ok()?.checked_add(1)
}

/// Driver for one upload attempt.
pub(crate) struct TransferSession {
    object: ObjectHandle,
    options: TransferOptions,
    resumable: bool,
    endpoints: Endpoints,
    factory: Arc<dyn AuthorizedRequestFactory>,
    store: Arc<dyn SessionStore>,
    input: Option<UploadInput>,
    validator: Arc<Mutex<StreamingValidator>>,
    phase_tx: watch::Sender<Phase>,
    bytes_confirmed: u64,
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("object", &self.object)
            .field("resumable", &self.resumable)
            .field("bytes_confirmed", &self.bytes_confirmed)
            .finish_non_exhaustive()
    }
}

/// Everything a session needs besides its input channel.
pub(crate) struct SessionParts {
    pub(crate) object: ObjectHandle,
    pub(crate) options: TransferOptions,
    pub(crate) resumable: bool,
    pub(crate) endpoints: Endpoints,
    pub(crate) factory: Arc<dyn AuthorizedRequestFactory>,
    pub(crate) store: Arc<dyn SessionStore>,
}

impl TransferSession {
    pub(crate) fn new(
        parts: SessionParts,
        input: UploadInput,
        validator: Arc<Mutex<StreamingValidator>>,
        phase_tx: watch::Sender<Phase>,
    ) -> Self {
        Self {
            object: parts.object,
            options: parts.options,
            resumable: parts.resumable,
            endpoints: parts.endpoints,
            factory: parts.factory,
            store: parts.store,
            input: Some(input),
            validator,
            phase_tx,
            bytes_confirmed: 0,
        }
    }

    /// Drive the session to a terminal phase.
    pub(crate) async fn run(mut self) -> TransferResult<ObjectMetadata> {
        let mut phase = if self.resumable {
            Phase::Negotiating
        } else {
            Phase::Posting
        };

        loop {
            debug!(object = %self.object, phase = phase.name(), "entering phase");
            self.phase_tx.send_replace(phase.clone());

            let outcome = match &phase {
                Phase::Negotiating => self.negotiate().await,
                Phase::Querying { uri } => self.query_offset(uri).await,
                Phase::Sending { uri, offset } => self.send(uri, *offset).await,
                Phase::Posting => self.post_simple().await,
                Phase::Verifying { metadata } => self.verify(metadata).await,
                Phase::Done { metadata } => {
                    self.clear_record().await;
                    info!(
                        object = %self.object,
                        bytes = self.bytes_confirmed,
                        generation = ?metadata.generation,
                        "upload complete"
                    );
                    return Ok(metadata.clone());
                }
                Phase::Failed => {
                    return Err(self.transfer_error(ExchangeError::Malformed(
                        "invalid session transition".to_owned(),
                    )));
                }
            };

            match outcome {
                Ok(event) => phase = phase.advance(event),
                Err(err) => {
                    warn!(object = %self.object, phase = phase.name(), error = %err, "upload failed");
                    self.phase_tx.send_replace(phase.advance(SessionEvent::Failed));
                    return Err(err);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    async fn negotiate(&mut self) -> TransferResult<SessionEvent> {
        let key = self.object.key();
        if let Some(record) = self.store.get(&key).await? {
            info!(object = %self.object, uri = %record.uri, "resuming persisted upload session");
            return Ok(SessionEvent::Resume { uri: record.uri });
        }

        let body = serde_json::to_vec(&self.resource_body())
            .map_err(|e| self.negotiation_error(ExchangeError::Malformed(e.to_string())))?;
        let request = http::Request::builder()
            .method(Method::POST)
            .uri(self.endpoints.upload_url(&self.object, UploadType::Resumable))
            .header(X_UPLOAD_CONTENT_TYPE, self.options.content_type())
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body(RequestBody::from_bytes(body))
            .map_err(|e| self.negotiation_error(e.into()))?;

        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| self.negotiation_error(e.into()))?;
        if !response.status().is_success() {
            let err = ExchangeError::from_response(response).await;
            return Err(self.negotiation_error(err));
        }

        let uri = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or_else(|| {
                self.negotiation_error(ExchangeError::Malformed(
                    "missing Location header in upload initiation response".to_owned(),
                ))
            })?;

        self.store.set(&key, SessionRecord::new(uri.clone())).await?;
        info!(object = %self.object, uri = %uri, "created resumable upload session");
        Ok(SessionEvent::Negotiated { uri })
    }

    async fn query_offset(&mut self, uri: &str) -> TransferResult<SessionEvent> {
        let request = http::Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("content-range", "bytes */*")
            .header(CONTENT_LENGTH, "0")
            .body(RequestBody::Empty)
            .map_err(|e| self.transfer_error(e.into()))?;

        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| self.transfer_error(e.into()))?;
        let status = response.status();
        debug!(object = %self.object, %status, "resume query answered");

        if status == RESUME_INCOMPLETE {
            let next = match response.headers().get(http::header::RANGE) {
                None => 0,
                Some(value) => value
                    .to_str()
                    .ok()
                    .and_then(parse_resume_offset)
                    .ok_or_else(|| {
                        self.transfer_error(ExchangeError::Malformed(format!(
                            "invalid Range header in resume response: {value:?}"
                        )))
                    })?,
            };
            self.bytes_confirmed = next;
            info!(object = %self.object, offset = next, "resuming upload");
            return Ok(SessionEvent::OffsetConfirmed { next });
        }

        if status.is_success() {
            let metadata = self.read_metadata(response).await?;
            info!(object = %self.object, "upload already completed on the server");
            return Ok(SessionEvent::AlreadyComplete { metadata });
        }

        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            // The session no longer exists; the next attempt must renegotiate.
            self.clear_record().await;
        }
        let err = ExchangeError::from_response(response).await;
        Err(self.transfer_error(err))
    }

    async fn send(&mut self, uri: &str, offset: u64) -> TransferResult<SessionEvent> {
        let Some(mut input) = self.input.take() else {
            return Err(self.transfer_error(ExchangeError::Malformed(
                "upload input already consumed".to_owned(),
            )));
        };
        input.skip_prefix(offset);

        let request = http::Request::builder()
            .method(Method::PUT)
            .uri(uri)
            .header("content-range", format!("bytes {offset}-*/*"))
            .header(CONTENT_TYPE, self.options.content_type())
            .body(RequestBody::streaming(input.into_stream()))
            .map_err(|e| self.transfer_error(e.into()))?;

        debug!(object = %self.object, offset, "sending payload");
        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| self.transfer_error(e.into()))?;
        if !response.status().is_success() {
            let err = ExchangeError::from_response(response).await;
            return Err(self.transfer_error(err));
        }

        let metadata = self.read_metadata(response).await?;
        self.bytes_confirmed = metadata
            .size_bytes()
            .unwrap_or_else(|| self.validator.lock().bytes_seen());
        Ok(SessionEvent::Uploaded { metadata })
    }

    async fn post_simple(&mut self) -> TransferResult<SessionEvent> {
        let Some(mut input) = self.input.take() else {
            return Err(self.transfer_error(ExchangeError::Malformed(
                "upload input already consumed".to_owned(),
            )));
        };

        let mut payload = BytesMut::new();
        while let Some(chunk) = input.next_chunk().await {
            let chunk = chunk.map_err(|e| self.transfer_error(ExchangeError::Body(e)))?;
            payload.extend_from_slice(&chunk);
        }
        let payload = payload.freeze();
        let len = payload.len() as u64;

        let builder = http::Request::builder().method(Method::POST);
        let built = if self.options.metadata.is_empty() {
            builder
                .uri(self.endpoints.upload_url(&self.object, UploadType::Media))
                .header(CONTENT_TYPE, self.options.content_type())
                .body(RequestBody::from_bytes(payload))
        } else {
            let boundary = format!("stowline-{}", uuid::Uuid::new_v4().simple());
            let body = self.multipart_body(&boundary, &payload)?;
            builder
                .uri(self.endpoints.upload_url(&self.object, UploadType::Multipart))
                .header(CONTENT_TYPE, format!("multipart/related; boundary={boundary}"))
                .body(RequestBody::from_bytes(body))
        };
        let request = built.map_err(|e| self.transfer_error(e.into()))?;

        debug!(object = %self.object, bytes = len, "sending simple upload");
        let response = self
            .factory
            .execute(request)
            .await
            .map_err(|e| self.transfer_error(e.into()))?;
        if !response.status().is_success() {
            let err = ExchangeError::from_response(response).await;
            return Err(self.transfer_error(err));
        }

        let metadata = self.read_metadata(response).await?;
        self.bytes_confirmed = len;
        Ok(SessionEvent::Uploaded { metadata })
    }

    async fn verify(&mut self, metadata: &ObjectMetadata) -> TransferResult<SessionEvent> {
        // After an already-complete resume query the caller's bytes have not
        // been read yet; they still have to go through the validator.
        if let Some(mut input) = self.input.take() {
            input
                .drain()
                .await
                .map_err(|e| self.transfer_error(ExchangeError::Body(e)))?;
        }

        let mode = self.options.validation;
        let Some(local) = self.validator.lock().digest() else {
            return Ok(SessionEvent::Verified);
        };
        let Some(server) = checksums::server_digest(mode, metadata) else {
            warn!(object = %self.object, %mode, "server reported no checksum, skipping validation");
            return Ok(SessionEvent::Verified);
        };
        if checksums::matches(mode, &local, server) {
            debug!(object = %self.object, %mode, "checksum verified");
            return Ok(SessionEvent::Verified);
        }

        let server = checksums::normalize_server_digest(server).to_owned();
        warn!(
            object = %self.object,
            %mode,
            local = %local,
            server = %server,
            "checksum mismatch, deleting uploaded object"
        );
        // The session is spent: the server holds a finished (corrupt) object.
        self.clear_record().await;

        let object = self.object.to_string();
        match self.delete_remote().await {
            Ok(()) => Err(TransferError::FileNoUpload {
                object,
                mode,
                local,
                server,
            }),
            Err(delete_error) => Err(TransferError::FileNoUploadDelete {
                object,
                mode,
                local,
                server,
                delete_error,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn resource_body(&self) -> serde_json::Value {
        let mut resource = serde_json::json!({
            "name": self.object.name(),
            "contentType": self.options.content_type(),
        });
        if !self.options.metadata.is_empty() {
            resource["metadata"] = serde_json::json!(self.options.metadata);
        }
        resource
    }

    fn multipart_body(&self, boundary: &str, payload: &Bytes) -> TransferResult<Bytes> {
        let resource = serde_json::to_vec(&self.resource_body())
            .map_err(|e| self.transfer_error(ExchangeError::Malformed(e.to_string())))?;

        let mut body = BytesMut::with_capacity(payload.len() + resource.len() + 256);
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.put_slice(&resource);
        body.put_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.put_slice(format!("Content-Type: {}\r\n\r\n", self.options.content_type()).as_bytes());
        body.put_slice(payload);
        body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        Ok(body.freeze())
    }

    async fn read_metadata(
        &self,
        response: http::Response<ResponseBody>,
    ) -> TransferResult<ObjectMetadata> {
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| self.transfer_error(ExchangeError::Body(e)))?;
        serde_json::from_slice(&body).map_err(|e| {
            self.transfer_error(ExchangeError::Malformed(format!(
                "invalid object resource: {e}"
            )))
        })
    }

    async fn delete_remote(&self) -> Result<(), ExchangeError> {
        let request = http::Request::builder()
            .method(Method::DELETE)
            .uri(self.endpoints.object_url(&self.object))
            .body(RequestBody::Empty)?;
        let response = self.factory.execute(request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(ExchangeError::from_response(response).await)
    }

    async fn clear_record(&self) {
        if let Err(e) = self.store.delete(&self.object.key()).await {
            warn!(object = %self.object, error = %e, "failed to clear upload session record");
        }
    }

    fn negotiation_error(&self, source: ExchangeError) -> TransferError {
        TransferError::Negotiation {
            object: self.object.to_string(),
            source,
        }
    }

    fn transfer_error(&self, source: ExchangeError) -> TransferError {
        TransferError::Transfer {
            object: self.object.to_string(),
            source,
        }
    }
}
