//! `multipart/related` parsing for simple uploads with metadata.
//!
//! The body carries exactly two parts: the JSON object resource, then the
//! payload.

use bytes::Bytes;

use crate::error::EmulatorError;

/// The two parts of a multipart upload.
#[derive(Debug)]
pub(crate) struct MultipartUpload {
    pub(crate) resource: serde_json::Value,
    pub(crate) content_type: Option<String>,
    pub(crate) payload: Bytes,
}

/// Boundary parameter of a `multipart/related` content type.
pub(crate) fn boundary(content_type: &str) -> Result<String, EmulatorError> {
    let parsed: mime::Mime = content_type
        .parse()
        .map_err(|e| EmulatorError::BadRequest(format!("invalid content type: {e}")))?;
    if parsed.type_() != mime::MULTIPART || parsed.subtype().as_str() != "related" {
        return Err(EmulatorError::BadRequest(format!(
            "expected multipart/related, got {content_type}"
        )));
    }
    parsed
        .get_param(mime::BOUNDARY)
        .map(|b| b.as_str().to_owned())
        .ok_or_else(|| EmulatorError::BadRequest("missing multipart boundary".to_owned()))
}

pub(crate) fn parse(body: &Bytes, boundary: &str) -> Result<MultipartUpload, EmulatorError> {
    let delimiter = format!("--{boundary}");
    let parts = split_parts(body, delimiter.as_bytes());
    let [meta, payload] = parts.as_slice() else {
        return Err(EmulatorError::BadRequest(format!(
            "expected 2 multipart parts, found {}",
            parts.len()
        )));
    };

    let (_, meta_body) = split_headers(body, meta.0, meta.1)?;
    let resource = serde_json::from_slice(&body[meta_body.0..meta_body.1])
        .map_err(|e| EmulatorError::BadRequest(format!("invalid object resource: {e}")))?;

    let (headers, data) = split_headers(body, payload.0, payload.1)?;
    let content_type = headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-type")
            .then(|| value.trim().to_owned())
    });

    Ok(MultipartUpload {
        resource,
        content_type,
        payload: body.slice(data.0..data.1),
    })
}

/// Byte ranges of the parts between delimiter lines.
fn split_parts(body: &[u8], delimiter: &[u8]) -> Vec<(usize, usize)> {
    let positions: Vec<usize> = body
        .windows(delimiter.len())
        .enumerate()
        .filter(|(i, w)| *w == delimiter && (*i == 0 || body[..*i].ends_with(b"\n")))
        .map(|(i, _)| i)
        .collect();

    positions
        .windows(2)
        .map(|pair| {
            let mut start = pair[0] + delimiter.len();
            if body[start..].starts_with(b"\r\n") {
                start += 2;
            }
            let mut end = pair[1];
            if body[..end].ends_with(b"\r\n") {
                end -= 2;
            } else if body[..end].ends_with(b"\n") {
                end -= 1;
            }
            (start, end.max(start))
        })
        .collect()
}

/// Split a part at the blank line into header text and body range.
fn split_headers(
    body: &[u8],
    start: usize,
    end: usize,
) -> Result<(String, (usize, usize)), EmulatorError> {
    let part = &body[start..end];
    let sep = part
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| EmulatorError::BadRequest("multipart part without headers".to_owned()))?;
    let headers = String::from_utf8_lossy(&part[..sep]).into_owned();
    Ok((headers, (start + sep + 4, end)))
}
