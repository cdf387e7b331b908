//! HTTP response model and byte emission.
//!
//! A handler returns a [`Response`]; [`encode_response`] turns it into the
//! exact bytes queued on the connection: status line, single and multi-value
//! headers, optional gzip compression, and either Content-Length framing or
//! chunked framing for very large bodies.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::collections::HashSet;
use std::fmt;
use std::io::Write as _;

/// Bodies at or above this size are emitted with chunked framing.
pub const CHUNK_THRESHOLD: usize = 10 * 1024 * 1024;

/// A response as produced by a handler.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers, emitted in order.
    pub headers: Vec<(String, String)>,
    /// Multi-value headers; a name listed here wins over the same name in
    /// `headers` and is emitted as a single comma-joined line.
    pub multi_value_headers: Vec<(String, Vec<String>)>,
    /// Body payload; base64 when `is_base64_encoded`.
    pub body: String,
    /// Whether `body` is base64 encoded and must be decoded before emission.
    pub is_base64_encoded: bool,
}

impl Response {
    /// Creates an empty response with the given status code.
    #[must_use]
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Self::default()
        }
    }

    /// A `200 OK` response.
    #[must_use]
    pub fn ok() -> Self {
        Self::new(200)
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets a base64-encoded binary body.
    #[must_use]
    pub fn with_binary_body(mut self, body: &[u8]) -> Self {
        self.body = BASE64.encode(body);
        self.is_base64_encoded = true;
        self
    }

    /// Appends a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Response emission failure.
#[derive(Debug)]
pub enum EncodeError {
    /// The body was flagged base64 but does not decode.
    Base64Decode,
    /// Gzip compression failed.
    Gzip(std::io::Error),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base64Decode => write!(f, "base64 decode error"),
            Self::Gzip(e) => write!(f, "gzip compression error: {e}"),
        }
    }
}

impl std::error::Error for EncodeError {}

/// Server-side gzip policy: compress bodies of at least `min_length` whose
/// content type is in `types`.
#[derive(Debug, Clone)]
pub struct GzipPolicy {
    /// Minimum body size worth compressing.
    pub min_length: usize,
    /// Content types (without parameters) eligible for compression.
    pub types: HashSet<String>,
}

impl Default for GzipPolicy {
    fn default() -> Self {
        let types = [
            "text/plain",
            "text/html",
            "text/css",
            "text/javascript",
            "application/json",
            "application/javascript",
            "application/xml",
        ]
        .into_iter()
        .map(str::to_string)
        .collect();
        Self {
            min_length: 8192,
            types,
        }
    }
}

/// Canonical reason phrase for a status code.
#[must_use]
pub fn reason_phrase(status_code: u16) -> &'static str {
    match status_code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Payload Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        _ => "",
    }
}

/// Encode a response into wire bytes.
///
/// `gzip` is the active compression policy, present only when the server has
/// gzip enabled and the client negotiated it.
///
/// # Errors
///
/// Fails when a base64-flagged body does not decode or compression fails.
pub fn encode_response(
    response: &Response,
    gzip: Option<&GzipPolicy>,
) -> Result<Vec<u8>, EncodeError> {
    encode_response_with_threshold(response, gzip, CHUNK_THRESHOLD)
}

/// [`encode_response`] with an explicit chunked-framing threshold.
pub fn encode_response_with_threshold(
    response: &Response,
    gzip: Option<&GzipPolicy>,
    chunk_threshold: usize,
) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(256 + response.body.len());

    let reason = reason_phrase(response.status_code);
    if reason.is_empty() {
        out.extend_from_slice(format!("HTTP/1.1 {}", response.status_code).as_bytes());
    } else {
        out.extend_from_slice(format!("HTTP/1.1 {} {}", response.status_code, reason).as_bytes());
    }

    let multi_names: Vec<&str> = response
        .multi_value_headers
        .iter()
        .map(|(name, _)| name.as_str())
        .collect();

    for (name, value) in &response.headers {
        if multi_names
            .iter()
            .any(|m| m.eq_ignore_ascii_case(name.as_str()))
        {
            continue;
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
    }

    for (name, values) in &response.multi_value_headers {
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(values.join(", ").as_bytes());
    }

    let mut body: Vec<u8> = if response.is_base64_encoded {
        BASE64
            .decode(response.body.as_bytes())
            .map_err(|_| EncodeError::Base64Decode)?
    } else {
        response.body.clone().into_bytes()
    };

    if let Some(policy) = gzip {
        if body.len() >= policy.min_length && content_type_in(&response.headers, &policy.types) {
            body = compress_gzip(&body).map_err(EncodeError::Gzip)?;
            out.extend_from_slice(b"\r\nContent-Encoding: gzip");
        }
    }

    if body.len() < chunk_threshold {
        out.extend_from_slice(format!("\r\nContent-Length: {}", body.len()).as_bytes());
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(&body);
    } else {
        out.extend_from_slice(b"\r\nTransfer-Encoding: chunked\r\n\r\n");
        for chunk in body.chunks(chunk_threshold) {
            out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"0\r\n\r\n");
    }

    Ok(out)
}

fn content_type_in(headers: &[(String, String)], types: &HashSet<String>) -> bool {
    let value = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str());
    let Some(value) = value else { return false };
    let base = value.split(';').next().unwrap_or("").trim();
    types.contains(&base.to_ascii_lowercase())
}

fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(data)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_gzip(data: &[u8]) -> Vec<u8> {
        use flate2::read::GzDecoder;
        use std::io::Read;
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn encodes_status_line_and_content_length() {
        let resp = Response::ok().with_body("ok");
        let bytes = encode_response(&resp, None).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("\r\nContent-Length: 2\r\n\r\nok"));
    }

    #[test]
    fn unknown_status_has_no_reason() {
        let resp = Response::new(299);
        let bytes = encode_response(&resp, None).unwrap();
        assert!(bytes.starts_with(b"HTTP/1.1 299\r\n"));
    }

    #[test]
    fn headers_emitted() {
        let resp = Response::ok()
            .with_header("Content-Type", "text/plain")
            .with_body("x");
        let text = String::from_utf8(encode_response(&resp, None).unwrap()).unwrap();
        assert!(text.contains("\r\nContent-Type: text/plain\r\n"));
    }

    #[test]
    fn multi_value_header_wins_and_joins() {
        let mut resp = Response::ok().with_header("X-Tag", "dropped");
        resp.multi_value_headers
            .push(("X-Tag".to_string(), vec!["a".to_string(), "b".to_string()]));
        let text = String::from_utf8(encode_response(&resp, None).unwrap()).unwrap();
        assert!(text.contains("\r\nX-Tag: a, b\r\n"));
        assert!(!text.contains("dropped"));
    }

    #[test]
    fn base64_body_decoded_before_emission() {
        let resp = Response::ok().with_binary_body(&[0xde, 0xad]);
        let bytes = encode_response(&resp, None).unwrap();
        let pos = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        assert_eq!(&bytes[pos + 4..], &[0xde, 0xad]);
    }

    #[test]
    fn bad_base64_body_fails() {
        let mut resp = Response::ok().with_body("!!not-base64!!");
        resp.is_base64_encoded = true;
        assert!(matches!(
            encode_response(&resp, None),
            Err(EncodeError::Base64Decode)
        ));
    }

    #[test]
    fn gzip_applied_when_policy_matches() {
        let body = "a".repeat(10_000);
        let resp = Response::ok()
            .with_header("Content-Type", "text/plain; charset=utf-8")
            .with_body(body.clone());
        let policy = GzipPolicy::default();
        let bytes = encode_response(&resp, Some(&policy)).unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Content-Encoding: gzip"));
        let pos = bytes.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        assert_eq!(decode_gzip(&bytes[pos + 4..]), body.into_bytes());
    }

    #[test]
    fn gzip_skipped_below_min_length() {
        let resp = Response::ok()
            .with_header("Content-Type", "text/plain")
            .with_body("short");
        let policy = GzipPolicy::default();
        let bytes = encode_response(&resp, Some(&policy)).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("gzip"));
    }

    #[test]
    fn gzip_skipped_for_foreign_content_type() {
        let body = "a".repeat(10_000);
        let resp = Response::ok()
            .with_header("Content-Type", "image/png")
            .with_body(body);
        let policy = GzipPolicy::default();
        let bytes = encode_response(&resp, Some(&policy)).unwrap();
        assert!(!String::from_utf8_lossy(&bytes).contains("gzip"));
    }

    #[test]
    fn large_body_uses_chunked_framing() {
        let body = "z".repeat(64);
        let resp = Response::ok().with_body(body.clone());
        let bytes = encode_response_with_threshold(&resp, None, 16).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked"));
        assert!(!text.contains("Content-Length"));
        assert!(text.contains("10\r\nzzzzzzzzzzzzzzzz\r\n"));
        assert!(text.ends_with("0\r\n\r\n"));
    }
}
