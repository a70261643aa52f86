//! The authorized-request seam between the transfer engine and the network.
//!
//! The engine never talks to a socket directly. Every HTTP exchange goes
//! through an [`AuthorizedRequestFactory`] supplied by the caller, which
//! attaches credentials and performs the request. Authorization failures and
//! transport failures are both reported as [`RequestError`] and propagate the
//! same way.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt, stream};

/// Boxed error type carried by [`RequestError::Transport`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A boxed stream of body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Error produced by an [`AuthorizedRequestFactory`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// Credentials could not be obtained or attached.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The request could not be sent or its response could not be received.
    #[error("transport error: {0}")]
    Transport(#[source] BoxError),
}

impl RequestError {
    /// Wrap any error as a transport failure.
    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

/// Outbound request body.
#[derive(Default)]
pub enum RequestBody {
    /// No body (`Content-Length: 0`).
    #[default]
    Empty,
    /// Fully buffered body.
    Full(Bytes),
    /// Body of unknown length produced incrementally.
    Streaming(ByteStream),
}

impl RequestBody {
    /// Create a buffered body.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Full(data.into())
    }

    /// Create a streaming body.
    #[must_use]
    pub fn streaming(stream: ByteStream) -> Self {
        Self::Streaming(stream)
    }

    /// Exact body length when known.
    #[must_use]
    pub fn exact_len(&self) -> Option<u64> {
        match self {
            Self::Empty => Some(0),
            Self::Full(data) => Some(data.len() as u64),
            Self::Streaming(_) => None,
        }
    }

    /// Convert into a chunk stream, whatever the variant.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        match self {
            Self::Empty => stream::empty().boxed(),
            Self::Full(data) => stream::once(async move { Ok(data) }).boxed(),
            Self::Streaming(s) => s,
        }
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::Full(data) => f.debug_struct("Full").field("size", &data.len()).finish(),
            Self::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Inbound response body, always consumed as a stream.
pub struct ResponseBody {
    stream: ByteStream,
}

impl ResponseBody {
    /// Wrap a chunk stream.
    #[must_use]
    pub fn from_stream(stream: ByteStream) -> Self {
        Self { stream }
    }

    /// Create a buffered body.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self::from_stream(stream::once(async move { Ok(data) }).boxed())
    }

    /// Create an empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::from_stream(stream::empty().boxed())
    }

    /// Read the whole body into memory.
    pub async fn collect(mut self) -> Result<Bytes, std::io::Error> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Take the underlying chunk stream.
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody")
    }
}

// ---------------------------------------------------------------------------
// AuthorizedRequestFactory
// ---------------------------------------------------------------------------

/// Performs an HTTP exchange with valid credentials attached.
///
/// Implementations must not follow redirects: a `308 Resume Incomplete`
/// response is part of the resumable upload protocol and has to reach the
/// transfer session unchanged.
#[async_trait]
pub trait AuthorizedRequestFactory: Send + Sync + 'static {
    /// Authorize and send `request`, returning the response with its body
    /// still unread.
    async fn execute(
        &self,
        request: http::Request<RequestBody>,
    ) -> Result<http::Response<ResponseBody>, RequestError>;
}
