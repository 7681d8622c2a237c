use crate::http::chunked::decode_chunked;
use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Upper bound on the request head; larger heads are rejected.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default upper bound on a buffered body, request or response.
pub const MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeadTooLarge,
    BodyTooLarge,
    Incomplete,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_request_with_limit(buf, MAX_BODY_SIZE)
}

/// Parses one request whose body may not exceed `max_body` bytes.
///
/// A declared `Content-Length` over the limit fails as soon as the head is
/// complete, without waiting for the body.
pub fn parse_request_with_limit(
    buf: &[u8],
    max_body: usize,
) -> Result<(Request, usize), ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(end) => end,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;

    if !version.starts_with("HTTP/") {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    // Headers
    let mut headers = Headers::new();

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;

        if key.trim().is_empty() {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key.trim(), value.trim());
    }

    // Body
    let chunked = headers
        .get("Transfer-Encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    let (body, body_consumed) = if chunked {
        let (body, consumed) = decode_chunked(body_bytes, max_body)?;
        headers.remove("Transfer-Encoding");
        headers.insert("Content-Length", body.len().to_string());
        (body, consumed)
    } else {
        let content_length = headers
            .get("Content-Length")
            .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
            .transpose()?
            .unwrap_or(0);

        if content_length > max_body {
            return Err(ParseError::BodyTooLarge);
        }

        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }

        (body_bytes[..content_length].to_vec(), content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
    };

    let total_consumed = headers_end + 4 + body_consumed;
    Ok((request, total_consumed))
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let req = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";

        let (parsed, consumed) = parse_http_request(req).unwrap();

        assert_eq!(parsed.path, "/");
        assert_eq!(parsed.headers.get("host").unwrap(), "example.com");
        assert_eq!(consumed, req.len());
    }

    #[test]
    fn oversized_head_is_rejected() {
        let mut req = b"GET / HTTP/1.1\r\nX-Filler: ".to_vec();
        req.resize(MAX_HEAD_SIZE + 1, b'a');

        assert!(matches!(parse_http_request(&req), Err(ParseError::HeadTooLarge)));
    }

    #[test]
    fn declared_length_over_limit_is_rejected() {
        let req = b"POST / HTTP/1.1\r\nContent-Length: 100000000000\r\n\r\nabc";

        assert!(matches!(parse_http_request(req), Err(ParseError::BodyTooLarge)));
        assert!(matches!(
            parse_request_with_limit(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n", 4),
            Err(ParseError::BodyTooLarge)
        ));
    }

    #[test]
    fn oversized_chunk_size_is_an_error_not_a_panic() {
        let req = b"POST / HTTP/1.1\r\nHost: a\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nabc\r\n0\r\n\r\n";

        assert!(matches!(parse_http_request(req), Err(ParseError::BodyTooLarge)));
    }
}
