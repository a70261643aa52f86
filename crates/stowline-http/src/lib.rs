//! HTTP transport for the Stowline transfer engine.
//!
//! [`HttpRequestFactory`] implements [`AuthorizedRequestFactory`] on top of a
//! `reqwest` client. Credentials come from a [`TokenSource`]; the engine never
//! sees them.

mod token;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use http::header::AUTHORIZATION;
use http::HeaderValue;
use stowline_transfer::{AuthorizedRequestFactory, RequestBody, RequestError, ResponseBody};
use tracing::debug;

pub use token::{StaticTokenSource, TokenSource};

/// Failure to build the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum HttpFactoryError {
    /// The underlying client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`AuthorizedRequestFactory`] backed by `reqwest`.
///
/// Redirects are never followed, so a `308 Resume Incomplete` reaches the
/// transfer session as is.
#[derive(Clone)]
pub struct HttpRequestFactory {
    client: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
}

impl std::fmt::Debug for HttpRequestFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestFactory").finish_non_exhaustive()
    }
}

impl HttpRequestFactory {
    /// Build a factory with a default client.
    pub fn new(tokens: Arc<dyn TokenSource>) -> Result<Self, HttpFactoryError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("stowline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, tokens))
    }

    /// Build a factory around an existing client. The client must not follow
    /// redirects.
    #[must_use]
    pub fn with_client(client: reqwest::Client, tokens: Arc<dyn TokenSource>) -> Self {
        Self { client, tokens }
    }

    async fn authorization(&self) -> Result<Option<HeaderValue>, RequestError> {
        let Some(token) = self.tokens.token().await? else {
            return Ok(None);
        };
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| RequestError::Authorization(format!("invalid access token: {e}")))?;
        value.set_sensitive(true);
        Ok(Some(value))
    }
}

#[async_trait]
impl AuthorizedRequestFactory for HttpRequestFactory {
    async fn execute(
        &self,
        request: http::Request<RequestBody>,
    ) -> Result<http::Response<ResponseBody>, RequestError> {
        let (mut parts, body) = request.into_parts();
        if let Some(value) = self.authorization().await? {
            parts.headers.insert(AUTHORIZATION, value);
        }

        let body = match body {
            RequestBody::Empty => reqwest::Body::from(Vec::new()),
            RequestBody::Full(data) => reqwest::Body::from(data),
            RequestBody::Streaming(stream) => reqwest::Body::wrap_stream(stream),
        };

        debug!(method = %parts.method, uri = %parts.uri, "sending request");
        let response = self
            .client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body)
            .send()
            .await
            .map_err(RequestError::transport)?;
        debug!(status = %response.status(), "received response");

        let mut builder = http::Response::builder()
            .status(response.status())
            .version(response.version());
        if let Some(headers) = builder.headers_mut() {
            *headers = response.headers().clone();
        }
        let stream = response
            .bytes_stream()
            .map_err(std::io::Error::other);
        builder
            .body(ResponseBody::from_stream(Box::pin(stream)))
            .map_err(RequestError::transport)
    }
}
