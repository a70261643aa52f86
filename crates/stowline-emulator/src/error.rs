//! Emulator errors and their JSON API representation.

use bytes::Bytes;
use http::StatusCode;
use http_body_util::Full;

/// A request the emulator refuses.
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    /// No object, session, or route matches.
    #[error("{0}")]
    NotFound(String),

    /// The request is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// A fault switch is on.
    #[error("{0}")]
    Injected(String),
}

impl EmulatorError {
    /// Status code sent for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Injected(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Render as a JSON API error response:
    ///
    /// ```json
    /// { "error": { "code": 404, "message": "No such object: b/o" } }
    /// ```
    #[must_use]
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let body = serde_json::json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
            }
        });
        json_response(status, &body)
    }
}

/// A JSON response with `status`.
pub(crate) fn json_response(
    status: StatusCode,
    body: &impl serde::Serialize,
) -> http::Response<Full<Bytes>> {
    let data = serde_json::to_vec(body).unwrap_or_default();
    let mut response = http::Response::new(Full::new(Bytes::from(data)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json; charset=UTF-8"),
    );
    response
}
