//! Scripted request factory for unit tests.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use parking_lot::Mutex;
use stowline_core::ValidationMode;

use crate::checksums::compute;
use crate::request::{AuthorizedRequestFactory, RequestBody, RequestError, ResponseBody};

/// A request as the factory received it, body fully read.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: Method,
    pub(crate) uri: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One scripted answer.
#[derive(Debug)]
pub(crate) enum Reply {
    Response {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Fail(String),
    /// Never answer.
    Hang,
}

impl Reply {
    pub(crate) fn status(status: StatusCode) -> Self {
        Self::Response {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub(crate) fn json(value: serde_json::Value) -> Self {
        Self::Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from(value.to_string()),
        }
        .header("content-type", "application/json")
    }

    pub(crate) fn bytes(body: impl Into<Bytes>) -> Self {
        Self::Response {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub(crate) fn fail(message: &str) -> Self {
        Self::Fail(message.to_owned())
    }

    pub(crate) fn header(mut self, name: &'static str, value: &str) -> Self {
        if let Self::Response { headers, .. } = &mut self {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        self
    }
}

/// Replays [`Reply`]s in order and records every request.
///
/// Request bodies are read to the end before the reply is produced, the way a
/// server would consume an upload.
#[derive(Debug)]
pub(crate) struct ScriptedFactory {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedFactory {
    pub(crate) fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AuthorizedRequestFactory for ScriptedFactory {
    async fn execute(
        &self,
        request: http::Request<RequestBody>,
    ) -> Result<http::Response<ResponseBody>, RequestError> {
        let (parts, body) = request.into_parts();
        let mut stream = body.into_stream();
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.map_err(RequestError::transport)?);
        }

        self.requests.lock().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body: Bytes::from(collected),
        });

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Response {
                status,
                headers,
                body,
            }) => {
                let mut response = http::Response::new(ResponseBody::from_bytes(body));
                *response.status_mut() = status;
                *response.headers_mut() = headers;
                Ok(response)
            }
            Some(Reply::Fail(message)) => Err(RequestError::transport(message)),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(RequestError::transport("no scripted reply left")),
        }
    }
}

/// An object resource for `data`, with both digests filled in.
pub(crate) fn object_json(bucket: &str, name: &str, data: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "kind": "storage#object",
        "bucket": bucket,
        "name": name,
        "size": data.len().to_string(),
        "generation": "1",
        "md5Hash": compute(ValidationMode::Md5, data),
        "crc32c": compute(ValidationMode::Crc32c, data),
    })
}
