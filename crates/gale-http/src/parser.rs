//! Permissive HTTP/1.x top-part parser and body transport.
//!
//! The request line and header block ("top part") are parsed from a byte
//! buffer that is known to contain the end-of-headers blank line. Parsing is
//! deliberately tolerant: CRLF, bare LF and bare CR all terminate lines,
//! repeated headers fold into multi-value maps, and continuation lines
//! (leading whitespace) append to the previous value.
//!
//! The body ("bottom part") is carried to the handler as a string. Binary
//! content types are base64 encoded and flagged, text types pass through
//! verbatim.

use crate::request::{HttpVersion, Method, Params, Request};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::fmt;

/// Top-part or body parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The request line has no method token.
    NoHttpMethod,
    /// The method token is not a known HTTP method.
    InvalidHttpMethod,
    /// The request line has no URL token.
    NoUrl,
    /// The request line ends before a version could be read.
    NoHttpVersion,
    /// The version token is not of the form `HTTP/<digit>[.<digit>]`.
    InvalidHttpVersion,
    /// A header line carries no name before the colon.
    NoHeaderKey,
    /// Request line too long.
    RequestLineTooLong,
    /// Header block too large.
    HeadersTooLarge,
    /// A percent-escape in the path or query is malformed.
    UrlDecode,
    /// The query string is not a `key=value&...` sequence.
    InvalidQueryString,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHttpMethod => write!(f, "no http method"),
            Self::InvalidHttpMethod => write!(f, "invalid http method"),
            Self::NoUrl => write!(f, "no url"),
            Self::NoHttpVersion => write!(f, "no http version"),
            Self::InvalidHttpVersion => write!(f, "invalid http version"),
            Self::NoHeaderKey => write!(f, "no header key"),
            Self::RequestLineTooLong => write!(f, "request line too long"),
            Self::HeadersTooLarge => write!(f, "headers too large"),
            Self::UrlDecode => write!(f, "url decode error"),
            Self::InvalidQueryString => write!(f, "query string parse error"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Size limits for the request line and header block.
///
/// Both bounds fail the request with a dedicated parse error (and a 400
/// downstream) rather than letting an unterminated line grow without limit.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    /// Maximum request line length in bytes.
    pub max_request_line_len: usize,
    /// Maximum total header block size, request line included.
    pub max_headers_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_request_line_len: 8 * 1024,
            max_headers_size: 64 * 1024,
        }
    }
}

/// Parse the request line and headers from `buf` with default limits.
///
/// `buf` must contain the end-of-headers blank line (the caller locates it
/// with [`ParseProgress`](crate::ParseProgress)). Returns the request
/// (without body) and the offset of the first body byte.
pub fn parse_top_part(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_top_part_with_limits(buf, &ParseLimits::default())
}

/// [`parse_top_part`] with explicit size limits.
pub fn parse_top_part_with_limits(
    buf: &[u8],
    limits: &ParseLimits,
) -> Result<(Request, usize), ParseError> {
    let mut lines = Lines::new(buf);

    // tolerate stray empty lines ahead of the request line
    let first = loop {
        match lines.next_line() {
            None => return Err(ParseError::NoHttpMethod),
            Some(line) if line.is_empty() => continue,
            Some(line) => break line,
        }
    };
    if first.len() > limits.max_request_line_len {
        return Err(ParseError::RequestLineTooLong);
    }
    let (method, url, version) = parse_request_line(first)?;

    let mut request = build_request(method, &url, version)?;

    // Header block: ends at the first empty line.
    let mut pending: Option<(String, String)> = None;
    while let Some(line) = lines.next_line() {
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            // continuation of the previous header value
            if let Some((_, value)) = pending.as_mut() {
                let cont = trim_ascii_start(line);
                value.push_str(&String::from_utf8_lossy(cont));
            }
            continue;
        }
        if let Some((name, value)) = pending.take() {
            request.headers.insert(&name, value);
        }
        pending = Some(parse_header_line(line)?);
    }
    if let Some((name, value)) = pending.take() {
        request.headers.insert(&name, value);
    }

    if lines.offset() > limits.max_headers_size {
        return Err(ParseError::HeadersTooLarge);
    }

    Ok((request, lines.offset()))
}

fn build_request(method: Method, url: &str, version: Option<HttpVersion>) -> Result<Request, ParseError> {
    let mut request = Request::new(method, url);
    request.version = version;

    match url.find('?') {
        Some(q) => {
            request.path = percent_decode(&url[..q]).map_err(|_| ParseError::UrlDecode)?;
            let query = &url[q + 1..];
            request.query_string = Some(query.to_string());
            request.query_params = parse_query_params(query)?;
        }
        None => {
            request.path = percent_decode(url).map_err(|_| ParseError::UrlDecode)?;
        }
    }
    Ok(request)
}

fn parse_request_line(line: &[u8]) -> Result<(Method, String, Option<HttpVersion>), ParseError> {
    let mut tokens = line.split(|&b| b == b' ' || b == b'\t').filter(|t| !t.is_empty());

    let method_tok = tokens.next().ok_or(ParseError::NoHttpMethod)?;
    let method = Method::from_bytes(method_tok).ok_or(ParseError::InvalidHttpMethod)?;

    let url_tok = tokens.next().ok_or(ParseError::NoUrl)?;
    let url = String::from_utf8_lossy(url_tok).into_owned();

    let version = match tokens.next() {
        Some(tok) => {
            if !is_http_version(tok) {
                return Err(ParseError::InvalidHttpVersion);
            }
            std::str::from_utf8(tok).ok().and_then(HttpVersion::parse)
        }
        None => None,
    };

    Ok((method, url, version))
}

// HTTP/<digit>[.<digit>]; anything else on the version slot is rejected.
fn is_http_version(tok: &[u8]) -> bool {
    if tok.len() < 6 || &tok[..5] != b"HTTP/" || !tok[5].is_ascii_digit() {
        return false;
    }
    match tok.len() {
        6 => true,
        8 => tok[6] == b'.' && tok[7].is_ascii_digit(),
        _ => false,
    }
}

fn parse_header_line(line: &[u8]) -> Result<(String, String), ParseError> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::NoHeaderKey)?;
    let name = trim_ascii(&line[..colon]);
    if name.is_empty() {
        return Err(ParseError::NoHeaderKey);
    }
    let value = trim_ascii_start(&line[colon + 1..]);
    Ok((
        String::from_utf8_lossy(name).to_ascii_lowercase(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}

fn trim_ascii_start(mut bytes: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let mut bytes = trim_ascii_start(bytes);
    while let [rest @ .., last] = bytes {
        if last.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

/// Line splitter tolerating `\r\n`, bare `\n` and bare `\r` terminators.
struct Lines<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next_line(&mut self) -> Option<&'a [u8]> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let start = self.pos;
        let mut end = start;
        while end < self.buf.len() && self.buf[end] != b'\r' && self.buf[end] != b'\n' {
            end += 1;
        }
        // consume one terminator: \r\n, \n or \r
        self.pos = if end + 1 < self.buf.len() && self.buf[end] == b'\r' && self.buf[end + 1] == b'\n' {
            end + 2
        } else if end < self.buf.len() {
            end + 1
        } else {
            end
        };
        Some(&self.buf[start..end])
    }

    /// Offset of the first unconsumed byte.
    fn offset(&self) -> usize {
        self.pos
    }
}

/// Percent-decode a path or query component. `+` decodes to a space,
/// `%xx` to the corresponding byte; a truncated or non-hex escape fails.
pub fn percent_decode(s: &str) -> Result<String, ParseError> {
    if !s.contains(['%', '+']) {
        return Ok(s.to_string());
    }
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hi = bytes.get(i + 1).copied().ok_or(ParseError::UrlDecode)?;
                let lo = bytes.get(i + 2).copied().ok_or(ParseError::UrlDecode)?;
                let hi = hex_value(hi).ok_or(ParseError::UrlDecode)?;
                let lo = hex_value(lo).ok_or(ParseError::UrlDecode)?;
                out.push((hi << 4) | lo);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Parse a `key1=value1&key2=value2` query string into decoded parameters.
///
/// A segment without `=` is a parse error; keys and values are
/// percent-decoded.
pub fn parse_query_params(query: &str) -> Result<Params, ParseError> {
    let mut params = Params::new();
    if query.is_empty() {
        return Ok(params);
    }
    for pair in query.split('&') {
        let eq = pair.find('=').ok_or(ParseError::InvalidQueryString)?;
        let key = percent_decode(&pair[..eq])?;
        let value = percent_decode(&pair[eq + 1..])?;
        params.insert(&key, value);
    }
    Ok(params)
}

/// Whether a content type transports binary payloads.
///
/// `text/*`, `application/x-www-form-urlencoded`, `application/json` and
/// `application/xml` are textual; `multipart/form-data`, every other
/// `application/*`, and `image/*`, `audio/*`, `video/*` are binary.
#[must_use]
pub fn is_binary_type(content_type: &str) -> bool {
    let ct = content_type.trim().to_ascii_lowercase();
    if ct.starts_with("text/")
        || ct.starts_with("application/x-www-form-urlencoded")
        || ct.starts_with("application/json")
        || ct.starts_with("application/xml")
    {
        return false;
    }
    ct.starts_with("multipart/form-data")
        || ct.starts_with("application/")
        || ct.starts_with("image/")
        || ct.starts_with("audio/")
        || ct.starts_with("video/")
}

/// Extract the boundary token from a `multipart/form-data` content type.
#[must_use]
pub fn multipart_boundary(content_type: &str) -> Option<String> {
    let ct = content_type.trim();
    if !ct.to_ascii_lowercase().starts_with("multipart/form-data") {
        return None;
    }
    for param in ct.split(';').skip(1) {
        let param = param.trim();
        if let Some(boundary) = param.strip_prefix("boundary=") {
            if !boundary.is_empty() {
                return Some(boundary.trim_matches('"').to_string());
            }
        }
    }
    None
}

/// The decoded body transport view.
#[derive(Debug, Clone)]
pub struct BodyTransport {
    /// Body payload, base64 encoded when `is_base64_encoded`.
    pub body: String,
    /// Whether the payload is base64 encoded.
    pub is_base64_encoded: bool,
    /// Multipart boundary from the content type, if any.
    pub multipart_boundary: Option<String>,
}

/// Decode raw body bytes into the transport view.
///
/// Binary content types (and payloads that are not valid UTF-8) are
/// base64 encoded and flagged.
#[must_use]
pub fn decode_body(raw: &[u8], content_type: Option<&str>) -> BodyTransport {
    let boundary = content_type.and_then(multipart_boundary);
    let binary = content_type.map(is_binary_type).unwrap_or(false);

    if binary {
        return BodyTransport {
            body: BASE64.encode(raw),
            is_base64_encoded: true,
            multipart_boundary: boundary,
        };
    }

    match std::str::from_utf8(raw) {
        Ok(text) => BodyTransport {
            body: text.to_string(),
            is_base64_encoded: false,
            multipart_boundary: boundary,
        },
        Err(_) => BodyTransport {
            body: BASE64.encode(raw),
            is_base64_encoded: true,
            multipart_boundary: boundary,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_get() {
        let buf = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, consumed) = parse_top_part(buf).unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/");
        assert_eq!(req.version, Some(HttpVersion::Http11));
        assert_eq!(req.headers.get("host"), Some("x"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn parses_with_body_bytes_after_headers() {
        let buf = b"POST /u HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello";
        let (req, consumed) = parse_top_part(buf).unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.content_length(), 5);
        assert_eq!(&buf[consumed..], b"hello");
    }

    #[test]
    fn tolerates_bare_lf() {
        let buf = b"GET /a HTTP/1.0\nHost: y\nAccept: */*\n\n";
        let (req, consumed) = parse_top_part(buf).unwrap();
        assert_eq!(req.version, Some(HttpVersion::Http10));
        assert_eq!(req.headers.get("host"), Some("y"));
        assert_eq!(req.headers.get("accept"), Some("*/*"));
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn missing_version_is_tolerated() {
        let buf = b"GET /legacy\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(req.version, None);
        assert_eq!(req.path, "/legacy");
    }

    #[test]
    fn rejects_unknown_method() {
        let buf = b"BOGUS / HTTP/1.1\r\n\r\n";
        assert_eq!(parse_top_part(buf).unwrap_err(), ParseError::InvalidHttpMethod);
    }

    #[test]
    fn rejects_bad_version() {
        let buf = b"GET / HTTQ/1.1\r\n\r\n";
        assert_eq!(parse_top_part(buf).unwrap_err(), ParseError::InvalidHttpVersion);
    }

    #[test]
    fn rejects_missing_url() {
        let buf = b"GET\r\n\r\n";
        assert_eq!(parse_top_part(buf).unwrap_err(), ParseError::NoUrl);
    }

    #[test]
    fn request_line_over_limit_fails() {
        let mut buf = b"GET /".to_vec();
        buf.extend(std::iter::repeat(b'a').take(40));
        buf.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let limits = ParseLimits {
            max_request_line_len: 32,
            max_headers_size: 64 * 1024,
        };
        assert_eq!(
            parse_top_part_with_limits(&buf, &limits).unwrap_err(),
            ParseError::RequestLineTooLong
        );
        // the default 8 KiB limit accepts it
        assert!(parse_top_part(&buf).is_ok());
    }

    #[test]
    fn header_block_over_limit_fails() {
        let mut buf = b"GET / HTTP/1.1\r\n".to_vec();
        for i in 0..8 {
            buf.extend_from_slice(format!("X-Filler-{i}: {}\r\n", "v".repeat(64)).as_bytes());
        }
        buf.extend_from_slice(b"\r\n");
        let limits = ParseLimits {
            max_request_line_len: 8 * 1024,
            max_headers_size: 256,
        };
        assert_eq!(
            parse_top_part_with_limits(&buf, &limits).unwrap_err(),
            ParseError::HeadersTooLarge
        );
    }

    #[test]
    fn header_names_lowercased() {
        let buf = b"GET / HTTP/1.1\r\nX-Custom-Header: Value\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(req.headers.get("x-custom-header"), Some("Value"));
    }

    #[test]
    fn repeated_headers_collected() {
        let buf = b"GET / HTTP/1.1\r\nX-Tag: a\r\nX-Tag: b\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(
            req.headers.get_all("x-tag").unwrap(),
            &["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn continuation_lines_append() {
        let buf = b"GET / HTTP/1.1\r\nX-Long: part1\r\n part2\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(req.headers.get("x-long"), Some("part1part2"));
    }

    #[test]
    fn header_without_colon_fails() {
        let buf = b"GET / HTTP/1.1\r\nnocolonhere\r\n\r\n";
        assert_eq!(parse_top_part(buf).unwrap_err(), ParseError::NoHeaderKey);
    }

    #[test]
    fn query_params_parsed_and_decoded() {
        let buf = b"GET /items?a=1&b=hello%20world&a=2 HTTP/1.1\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(req.query_string.as_deref(), Some("a=1&b=hello%20world&a=2"));
        assert_eq!(req.query_params.get("b"), Some("hello world"));
        assert_eq!(
            req.query_params.get_all("a").unwrap(),
            &["1".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn path_percent_decoded() {
        let buf = b"GET /a%2Fb+c HTTP/1.1\r\n\r\n";
        let (req, _) = parse_top_part(buf).unwrap();
        assert_eq!(req.path, "/a/b c");
        assert_eq!(req.url, "/a%2Fb+c");
    }

    #[test]
    fn bad_percent_escape_fails() {
        assert_eq!(percent_decode("/a%zz").unwrap_err(), ParseError::UrlDecode);
        assert_eq!(percent_decode("/a%2").unwrap_err(), ParseError::UrlDecode);
    }

    #[test]
    fn query_without_equals_fails() {
        let buf = b"GET /x?flag HTTP/1.1\r\n\r\n";
        assert_eq!(
            parse_top_part(buf).unwrap_err(),
            ParseError::InvalidQueryString
        );
    }

    #[test]
    fn binary_type_classification() {
        assert!(!is_binary_type("text/html"));
        assert!(!is_binary_type("application/json"));
        assert!(!is_binary_type("application/xml; charset=utf-8"));
        assert!(!is_binary_type("application/x-www-form-urlencoded"));
        assert!(is_binary_type("application/octet-stream"));
        assert!(is_binary_type("image/png"));
        assert!(is_binary_type("audio/ogg"));
        assert!(is_binary_type("video/mp4"));
        assert!(is_binary_type("multipart/form-data; boundary=xyz"));
    }

    #[test]
    fn multipart_boundary_extracted() {
        assert_eq!(
            multipart_boundary("multipart/form-data; boundary=----abc123"),
            Some("----abc123".to_string())
        );
        assert_eq!(multipart_boundary("application/json"), None);
        assert_eq!(multipart_boundary("multipart/form-data"), None);
    }

    #[test]
    fn text_body_passes_through() {
        let t = decode_body(b"hello", Some("text/plain"));
        assert_eq!(t.body, "hello");
        assert!(!t.is_base64_encoded);
    }

    #[test]
    fn binary_body_base64() {
        let t = decode_body(&[0xde, 0xad, 0xbe, 0xef], Some("application/octet-stream"));
        assert!(t.is_base64_encoded);
        assert_eq!(t.body, "3q2+7w==");
    }

    #[test]
    fn invalid_utf8_text_body_base64() {
        let t = decode_body(&[0xff, 0xfe], Some("text/plain"));
        assert!(t.is_base64_encoded);
    }

    #[test]
    fn body_without_content_type_is_text() {
        let t = decode_body(b"abc", None);
        assert!(!t.is_base64_encoded);
        assert_eq!(t.body, "abc");
    }
}
