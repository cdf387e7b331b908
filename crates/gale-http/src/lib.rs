//! HTTP/1.x wire layer for the gale connection server.
//!
//! This crate owns everything about request and response bytes, nothing
//! about sockets:
//!
//! - Permissive top-part parsing (request line + headers), tolerating bare
//!   LF line endings, continuation lines and repeated headers
//! - A restartable [`ParseProgress`] state machine that survives arbitrary
//!   partial reads
//! - Body transport: text bodies verbatim, binary bodies base64 encoded
//!   with an `isBase64Encoded` flag
//! - Connection-header and Accept-Encoding negotiation
//! - Response emission with gzip and chunked framing for huge bodies
//!
//! # Example
//!
//! ```
//! use gale_http::{ParseProgress, PumpState};
//!
//! let mut progress = ParseProgress::new();
//! let buf = b"GET /hello HTTP/1.1\r\nHost: example.com\r\n\r\n".to_vec();
//! assert_eq!(progress.pump(&buf).unwrap(), PumpState::Complete);
//! let request = progress.take_request().unwrap();
//! assert_eq!(request.path, "/hello");
//! ```

#![forbid(unsafe_code)]

mod connection;
mod parser;
mod progress;
mod request;
mod response;

pub use connection::{accepts_gzip, wants_keepalive};
pub use parser::{
    decode_body, is_binary_type, multipart_boundary, parse_query_params, parse_top_part,
    parse_top_part_with_limits, percent_decode, BodyTransport, ParseError, ParseLimits,
};
pub use progress::{ParseProgress, PumpState};
pub use request::{Headers, HttpVersion, Method, Params, Request};
pub use response::{
    encode_response, encode_response_with_threshold, reason_phrase, EncodeError, GzipPolicy,
    Response, CHUNK_THRESHOLD,
};
