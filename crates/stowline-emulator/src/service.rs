//! Hyper `Service` routing the JSON API subset to [`EmulatorState`].
//!
//! | Method | Path | Operation |
//! |--------|------|-----------|
//! | `POST` | `/upload/storage/v1/b/{b}/o?uploadType=resumable` | open session |
//! | `PUT` | `/upload/storage/v1/b/{b}/o?upload_id=..` | query or continue session |
//! | `POST` | `/upload/storage/v1/b/{b}/o?uploadType=media\|multipart` | simple upload |
//! | `GET` | `/storage/v1/b/{b}/o/{o}` | object resource (`alt=media`: data) |
//! | `GET` | `/download/storage/v1/b/{b}/o/{o}` | object data |
//! | `DELETE` | `/storage/v1/b/{b}/o/{o}` | delete object |

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_RANGE, CONTENT_TYPE, HOST, LOCATION, RANGE};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use percent_encoding::percent_decode_str;
use stowline_core::DEFAULT_CONTENT_TYPE;
use tracing::{debug, info, warn};

use crate::error::{EmulatorError, json_response};
use crate::multipart;
use crate::state::{EmulatorState, LoggedRequest, StoredObject};

type Response = http::Response<Full<Bytes>>;

/// Hyper service over shared [`EmulatorState`].
#[derive(Debug, Clone)]
pub struct EmulatorService {
    state: Arc<EmulatorState>,
}

impl EmulatorService {
    /// Create a service over `state`.
    #[must_use]
    pub fn new(state: Arc<EmulatorState>) -> Self {
        Self { state }
    }

    /// The shared state.
    #[must_use]
    pub fn state(&self) -> &Arc<EmulatorState> {
        &self.state
    }
}

impl hyper::service::Service<http::Request<Incoming>> for EmulatorService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: http::Request<Incoming>) -> Self::Future {
        let state = Arc::clone(&self.state);
        Box::pin(async move {
            let method = req.method().clone();
            let path = req.uri().path().to_owned();
            let response = match route(&state, req).await {
                Ok(response) => response,
                Err(err) => {
                    debug!(%method, %path, error = %err, "request rejected");
                    err.into_response()
                }
            };
            Ok(response)
        })
    }
}

/// Path targets the emulator understands.
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Upload { bucket: String },
    Object { bucket: String, name: String },
    Download { bucket: String, name: String },
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}

fn parse_target(path: &str) -> Option<Target> {
    if let Some(rest) = path.strip_prefix("/upload/storage/v1/b/") {
        let bucket = rest.strip_suffix("/o")?;
        return Some(Target::Upload {
            bucket: decode(bucket),
        });
    }
    let (download, rest) = match path.strip_prefix("/download/storage/v1/b/") {
        Some(rest) => (true, rest),
        None => (false, path.strip_prefix("/storage/v1/b/")?),
    };
    let (bucket, name) = rest.split_once("/o/")?;
    if name.is_empty() {
        return None;
    }
    let (bucket, name) = (decode(bucket), decode(name));
    Some(if download {
        Target::Download { bucket, name }
    } else {
        Target::Object { bucket, name }
    })
}

async fn route(state: &EmulatorState, req: http::Request<Incoming>) -> Result<Response, EmulatorError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_owned(), ToString::to_string);
    state.record(LoggedRequest {
        method: parts.method.to_string(),
        path: path_and_query,
        content_range: header(&parts.headers, CONTENT_RANGE.as_str()).map(str::to_owned),
    });

    let query: HashMap<String, String> = parts
        .uri
        .query()
        .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let base = format!(
        "http://{}",
        header(&parts.headers, HOST.as_str()).unwrap_or("localhost")
    );

    let target = parse_target(parts.uri.path())
        .ok_or_else(|| EmulatorError::NotFound(format!("no route for {}", parts.uri.path())))?;

    match (&parts.method, target) {
        (&Method::POST, Target::Upload { bucket }) => {
            match query.get("uploadType").map(String::as_str) {
                Some("resumable") => {
                    let body = collect(body).await?;
                    initiate(state, &parts.headers, &bucket, &query, &body, &base)
                }
                Some("media") => {
                    let body = collect(body).await?;
                    media_upload(state, &parts.headers, &bucket, &query, body, &base)
                }
                Some("multipart") => {
                    let body = collect(body).await?;
                    multipart_upload(state, &parts.headers, &bucket, &body, &base)
                }
                other => Err(EmulatorError::BadRequest(format!(
                    "unsupported uploadType {other:?}"
                ))),
            }
        }
        (&Method::PUT, Target::Upload { .. }) => {
            let id = query
                .get("upload_id")
                .ok_or_else(|| EmulatorError::BadRequest("missing upload_id".to_owned()))?;
            let range = header(&parts.headers, CONTENT_RANGE.as_str())
                .ok_or_else(|| EmulatorError::BadRequest("missing Content-Range".to_owned()))?;
            resumable_put(state, id, range, body, &base).await
        }
        (&Method::GET, Target::Object { bucket, name }) => {
            if query.get("alt").is_some_and(|v| v == "media") {
                return media(state, &bucket, &name);
            }
            if state.faults.fail_metadata() {
                return Err(EmulatorError::Injected(
                    "metadata requests are failing".to_owned(),
                ));
            }
            let object = lookup(state, &bucket, &name)?;
            Ok(json_response(StatusCode::OK, &state.resource(&object, &base)))
        }
        (&Method::GET, Target::Download { bucket, name }) => media(state, &bucket, &name),
        (&Method::DELETE, Target::Object { bucket, name }) => {
            if state.faults.fail_deletes() {
                return Err(EmulatorError::Injected("deletes are failing".to_owned()));
            }
            if !state.delete_object(&bucket, &name) {
                return Err(EmulatorError::NotFound(format!(
                    "No such object: {bucket}/{name}"
                )));
            }
            info!(bucket = %bucket, name = %name, "deleted object");
            Ok(empty(StatusCode::NO_CONTENT))
        }
        (method, _) => Err(EmulatorError::BadRequest(format!(
            "method {method} not allowed on {}",
            parts.uri.path()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

fn initiate(
    state: &EmulatorState,
    headers: &HeaderMap,
    bucket: &str,
    query: &HashMap<String, String>,
    body: &Bytes,
    base: &str,
) -> Result<Response, EmulatorError> {
    let resource: serde_json::Value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(body)
            .map_err(|e| EmulatorError::BadRequest(format!("invalid object resource: {e}")))?
    };
    let name = query
        .get("name")
        .cloned()
        .or_else(|| resource["name"].as_str().map(str::to_owned))
        .ok_or_else(|| EmulatorError::BadRequest("missing object name".to_owned()))?;
    let content_type = header(headers, "x-upload-content-type")
        .map(str::to_owned)
        .or_else(|| resource["contentType"].as_str().map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());

    let id = state.create_session(bucket, &name, content_type, custom_metadata(&resource));
    let location = format!(
        "{base}/upload/storage/v1/b/{}/o?uploadType=resumable&upload_id={id}",
        stowline_core::endpoint::encode_segment(bucket)
    );
    info!(bucket, name = %name, upload_id = %id, "opened resumable upload");

    let mut response = empty(StatusCode::OK);
    if let Ok(value) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(LOCATION, value);
    }
    Ok(response)
}

/// Parsed `Content-Range` of a resumable PUT.
#[derive(Debug, PartialEq, Eq)]
enum ContentRange {
    /// `bytes */*` or `bytes */<total>`: status query.
    Query,
    /// `bytes <start>-<end|*>/<total|*>`: data starting at `start`.
    Data { start: u64, total: Option<u64> },
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let ranges = value.trim().strip_prefix("bytes ")?;
    let (range, total) = ranges.split_once('/')?;
    let total = match total {
        "*" => None,
        n => Some(n.parse().ok()?),
    };
    if range == "*" {
        return Some(ContentRange::Query);
    }
    let (start, _) = range.split_once('-')?;
    Some(ContentRange::Data {
        start: start.parse().ok()?,
        total,
    })
}

async fn resumable_put(
    state: &EmulatorState,
    id: &str,
    range: &str,
    mut body: Incoming,
    base: &str,
) -> Result<Response, EmulatorError> {
    let not_found = || EmulatorError::NotFound(format!("No such upload session: {id}"));
    let persisted = state.session_len(id).ok_or_else(not_found)?;
    let range = parse_content_range(range)
        .ok_or_else(|| EmulatorError::BadRequest(format!("invalid Content-Range: {range}")))?;

    if let Some(object) = state.completed_object(id) {
        return Ok(json_response(StatusCode::OK, &state.resource(&object, base)));
    }

    let (start, total) = match range {
        ContentRange::Query => return Ok(incomplete(persisted)),
        ContentRange::Data { start, total } => (start, total),
    };
    if start > persisted {
        return Err(EmulatorError::BadRequest(format!(
            "write at {start} leaves a gap after persisted offset {persisted}"
        )));
    }
    state.truncate_session(id, start);

    // Frames are persisted as they arrive so an interrupted request keeps its
    // prefix.
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    if !state.append_to_session(id, &data) {
                        return Err(not_found());
                    }
                }
            }
            Err(e) => {
                let persisted = state.session_len(id).unwrap_or(0);
                warn!(upload_id = id, persisted, error = %e, "upload request interrupted");
                return Err(EmulatorError::BadRequest(format!("request body failed: {e}")));
            }
        }
    }

    let received = state.session_len(id).ok_or_else(not_found)?;
    if total.is_some_and(|total| received < total) {
        return Ok(incomplete(received));
    }
    let object = state.finalize_session(id).ok_or_else(not_found)?;
    info!(
        bucket = %object.bucket,
        name = %object.name,
        upload_id = id,
        size = object.data.len(),
        "completed resumable upload"
    );
    Ok(json_response(StatusCode::OK, &state.resource(&object, base)))
}

fn media_upload(
    state: &EmulatorState,
    headers: &HeaderMap,
    bucket: &str,
    query: &HashMap<String, String>,
    body: Bytes,
    base: &str,
) -> Result<Response, EmulatorError> {
    let name = query
        .get("name")
        .ok_or_else(|| EmulatorError::BadRequest("missing object name".to_owned()))?;
    let content_type = header(headers, CONTENT_TYPE.as_str())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_owned();
    let object = state.put_object(bucket, name, body, content_type, BTreeMap::new());
    info!(bucket, name = %name, size = object.data.len(), "completed media upload");
    Ok(json_response(StatusCode::OK, &state.resource(&object, base)))
}

fn multipart_upload(
    state: &EmulatorState,
    headers: &HeaderMap,
    bucket: &str,
    body: &Bytes,
    base: &str,
) -> Result<Response, EmulatorError> {
    let content_type = header(headers, CONTENT_TYPE.as_str())
        .ok_or_else(|| EmulatorError::BadRequest("missing Content-Type".to_owned()))?;
    let boundary = multipart::boundary(content_type)?;
    let upload = multipart::parse(body, &boundary)?;

    let name = upload.resource["name"]
        .as_str()
        .ok_or_else(|| EmulatorError::BadRequest("missing object name".to_owned()))?
        .to_owned();
    let content_type = upload
        .resource["contentType"]
        .as_str()
        .map(str::to_owned)
        .or(upload.content_type)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_owned());
    let metadata = custom_metadata(&upload.resource);

    let object = state.put_object(bucket, &name, upload.payload, content_type, metadata);
    info!(bucket, name = %name, size = object.data.len(), "completed multipart upload");
    Ok(json_response(StatusCode::OK, &state.resource(&object, base)))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

fn media(state: &EmulatorState, bucket: &str, name: &str) -> Result<Response, EmulatorError> {
    let object = lookup(state, bucket, name)?;
    let mut response = http::Response::new(Full::new(object.data.clone()));
    if let Ok(value) = HeaderValue::from_str(&object.content_type) {
        response.headers_mut().insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!(
        "crc32c={},md5={}",
        object.crc32c, object.md5_hash
    )) {
        response.headers_mut().insert("x-goog-hash", value);
    }
    Ok(response)
}

fn lookup(state: &EmulatorState, bucket: &str, name: &str) -> Result<StoredObject, EmulatorError> {
    state
        .get_object(bucket, name)
        .ok_or_else(|| EmulatorError::NotFound(format!("No such object: {bucket}/{name}")))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn collect(body: Incoming) -> Result<Bytes, EmulatorError> {
    body.collect()
        .await
        .map(http_body_util::Collected::to_bytes)
        .map_err(|e| EmulatorError::BadRequest(format!("failed to read request body: {e}")))
}

fn custom_metadata(resource: &serde_json::Value) -> BTreeMap<String, String> {
    resource["metadata"]
        .as_object()
        .map(|m| {
            m.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect()
        })
        .unwrap_or_default()
}

fn empty(status: StatusCode) -> Response {
    let mut response = http::Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

/// `308 Resume Incomplete` reporting `persisted` bytes.
fn incomplete(persisted: u64) -> Response {
    let mut response = empty(StatusCode::PERMANENT_REDIRECT);
    if persisted > 0 {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes=0-{}", persisted - 1)) {
            response.headers_mut().insert(RANGE, value);
        }
    }
    response
}
