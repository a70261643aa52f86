//! Upload coordination.
//!
//! [`UploadCoordinator::open_upload_stream`] hands back an [`UploadStream`]
//! right away and spawns the [`TransferSession`] that drives the network
//! exchanges. Writes are queued in a bounded channel, so the caller can push
//! the first few chunks before the session has been negotiated and is then
//! held to the pace of the upload.

use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use parking_lot::Mutex;
use stowline_core::{
    Endpoints, ObjectHandle, ObjectMetadata, TransferConfig, TransferOptions, UploadStrategy,
};
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::PollSender;
use tracing::{debug, info};

use crate::checksums::StreamingValidator;
use crate::error::{TransferError, TransferResult};
use crate::input::{Chunk, INPUT_CAPACITY, UploadInput};
use crate::request::AuthorizedRequestFactory;
use crate::session::{Phase, SessionParts, TransferSession};
use crate::session_store::SessionStore;

/// Entry point for uploads.
#[derive(Clone)]
pub struct UploadCoordinator {
    endpoints: Endpoints,
    simple_upload_threshold: u64,
    factory: Arc<dyn AuthorizedRequestFactory>,
    store: Arc<dyn SessionStore>,
}

impl std::fmt::Debug for UploadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCoordinator")
            .field("endpoints", &self.endpoints)
            .field("simple_upload_threshold", &self.simple_upload_threshold)
            .finish_non_exhaustive()
    }
}

impl UploadCoordinator {
    /// Create a coordinator sending requests through `factory` and persisting
    /// resumable sessions in `store`.
    #[must_use]
    pub fn new(
        config: &TransferConfig,
        factory: Arc<dyn AuthorizedRequestFactory>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            endpoints: Endpoints::new(config.endpoint.as_str()),
            simple_upload_threshold: config.simple_upload_threshold,
            factory,
            store,
        }
    }

    /// Open a writable stream for `object`.
    ///
    /// Returns immediately. The session runs on a spawned task, so this must
    /// be called from within a tokio runtime.
    #[must_use]
    pub fn open_upload_stream(&self, object: ObjectHandle, options: TransferOptions) -> UploadStream {
        let strategy = options.resolve_strategy(self.simple_upload_threshold);
        debug!(object = %object, %strategy, validation = %options.validation, "opening upload stream");

        let validator = Arc::new(Mutex::new(StreamingValidator::new(options.validation)));
        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let initial = match strategy {
            UploadStrategy::Resumable => Phase::Negotiating,
            UploadStrategy::Simple => Phase::Posting,
        };
        let (phase_tx, phase_rx) = watch::channel(initial);

        let session = TransferSession::new(
            SessionParts {
                object: object.clone(),
                options,
                resumable: strategy == UploadStrategy::Resumable,
                endpoints: self.endpoints.clone(),
                factory: Arc::clone(&self.factory),
                store: Arc::clone(&self.store),
            },
            UploadInput::new(rx, Arc::clone(&validator)),
            validator,
            phase_tx,
        );
        let task = tokio::spawn(session.run());

        UploadStream {
            object,
            tx: Some(PollSender::new(tx)),
            phase_rx,
            task: Some(task),
            ended: false,
        }
    }

    /// Upload an in-memory payload and wait for the result.
    ///
    /// The payload length is passed on to strategy selection unless the
    /// options already declare one.
    pub async fn upload_bytes(
        &self,
        object: ObjectHandle,
        mut options: TransferOptions,
        data: impl Into<Bytes>,
    ) -> TransferResult<ObjectMetadata> {
        let data = data.into();
        if options.content_length.is_none() {
            options.content_length = Some(data.len() as u64);
        }
        let mut stream = self.open_upload_stream(object, options);
        stream.write(data).await?;
        stream.finish().await
    }

    /// Forget the persisted resumable session for `object`, so the next upload
    /// negotiates a new one.
    pub async fn discard_session(&self, object: &ObjectHandle) -> TransferResult<()> {
        self.store.delete(&object.key()).await?;
        info!(object = %object, "discarded upload session");
        Ok(())
    }
}

/// Writable end of an upload.
///
/// A small number of chunks is buffered ahead of the network; beyond that,
/// [`UploadStream::write`] and [`AsyncWrite::poll_write`] wait until the
/// session has sent earlier data.
///
/// Dropping the stream before [`UploadStream::finish`] (or a shutdown through
/// [`AsyncWrite`]) cancels the upload like [`UploadStream::abort`].
pub struct UploadStream {
    object: ObjectHandle,
    tx: Option<PollSender<Chunk>>,
    phase_rx: watch::Receiver<Phase>,
    task: Option<JoinHandle<TransferResult<ObjectMetadata>>>,
    ended: bool,
}

impl std::fmt::Debug for UploadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadStream")
            .field("object", &self.object)
            .field("phase", &*self.phase_rx.borrow())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

impl UploadStream {
    /// The object being uploaded.
    #[must_use]
    pub fn object(&self) -> &ObjectHandle {
        &self.object
    }

    /// Current session phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase_rx.borrow().clone()
    }

    /// A receiver notified on every phase change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    /// Queue `data` for upload, waiting while the buffer is full.
    pub async fn write(&mut self, data: impl Into<Bytes>) -> TransferResult<()> {
        let data = data.into();
        poll_fn(|cx| self.poll_capacity(cx)).await?;
        self.send_chunk(Chunk::Data(data))
    }

    /// Mark the end of input and wait for the session to finish.
    pub async fn finish(mut self) -> TransferResult<ObjectMetadata> {
        poll_fn(|cx| self.poll_end_input(cx)).await;
        let Some(task) = self.task.take() else {
            return Err(TransferError::StreamClosed);
        };
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(TransferError::Aborted {
                object: self.object.to_string(),
            }),
        }
    }

    /// Cancel the upload. Nothing is sent to the server; a persisted resumable
    /// session stays in the store for a later attempt.
    pub fn abort(mut self) {
        self.cancel();
    }

    /// Reserve room for one chunk.
    fn poll_capacity(&mut self, cx: &mut Context<'_>) -> Poll<TransferResult<()>> {
        if self.ended || self.phase_rx.borrow().is_terminal() {
            return Poll::Ready(Err(TransferError::StreamClosed));
        }
        match self.tx.as_mut() {
            Some(tx) => tx.poll_reserve(cx).map_err(|_| TransferError::StreamClosed),
            None => Poll::Ready(Err(TransferError::StreamClosed)),
        }
    }

    /// Send a chunk into a slot reserved by [`Self::poll_capacity`].
    fn send_chunk(&mut self, chunk: Chunk) -> TransferResult<()> {
        self.tx
            .as_mut()
            .ok_or(TransferError::StreamClosed)?
            .send_item(chunk)
            .map_err(|_| TransferError::StreamClosed)
    }

    fn poll_end_input(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if self.ended {
            return Poll::Ready(());
        }
        match self.poll_capacity(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(())) => {
                if self.send_chunk(Chunk::End).is_err() {
                    debug!(object = %self.object, "session stopped reading before end of input");
                }
            }
            // A session that already failed has dropped its receiver.
            Poll::Ready(Err(_)) => {}
        }
        self.ended = true;
        self.tx = None;
        Poll::Ready(())
    }

    fn cancel(&mut self) {
        self.tx = None;
        if let Some(task) = self.task.take() {
            info!(object = %self.object, "aborting upload");
            task.abort();
        }
    }
}

impl AsyncWrite for UploadStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let sent = ready!(this.poll_capacity(cx))
            .and_then(|()| this.send_chunk(Chunk::Data(Bytes::copy_from_slice(buf))));
        Poll::Ready(
            sent.map(|()| buf.len())
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e)),
        )
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_end_input(cx).map(Ok)
    }
}

impl Drop for UploadStream {
    fn drop(&mut self) {
        if !self.ended {
            self.cancel();
        }
    }
}
