//! Connection-header and content negotiation.
//!
//! Decides, from request headers, whether the connection survives the
//! response (keep-alive) and whether the client accepts gzip.

use crate::request::Headers;

/// True when the request asked to keep the connection alive.
///
/// Recycling is opt-in: only an explicit `Connection: keep-alive` keeps the
/// socket open for the next request.
#[must_use]
pub fn wants_keepalive(headers: &Headers) -> bool {
    headers
        .get("connection")
        .map(|v| v.trim().eq_ignore_ascii_case("keep-alive"))
        .unwrap_or(false)
}

/// True when the Accept-Encoding header admits gzip.
///
/// A bare `gzip` token counts; a `gzip;q=<v>` quality value counts when
/// `0.001 <= v <= 1.0`.
#[must_use]
pub fn accepts_gzip(headers: &Headers) -> bool {
    let Some(accept) = headers.get("accept-encoding") else {
        return false;
    };

    // the overwhelmingly common case: "gzip, deflate..."
    if accept.starts_with("gzip,") {
        return true;
    }

    let Some(pos) = accept.find("gzip") else {
        return false;
    };
    let rest = &accept[pos + 4..];

    let mut chars = rest.chars();
    loop {
        match chars.next() {
            None | Some(',') => return true,
            Some(';') => break,
            Some(' ') => continue,
            Some(_) => return false,
        }
    }

    // parse the quality value after "gzip;"
    let params: String = chars.collect();
    let params = params.trim_start();
    let Some(value) = params
        .strip_prefix('q')
        .or_else(|| params.strip_prefix('Q'))
        .map(str::trim_start)
        .and_then(|p| p.strip_prefix('='))
    else {
        return false;
    };
    let value: &str = value.split(',').next().unwrap_or("").trim();
    match value.parse::<f64>() {
        Ok(q) => (0.001..=1.0).contains(&q),
        Err(_) => false,
    }
}
