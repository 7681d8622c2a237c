//! `Transfer-Encoding: chunked` decoding.
//!
//! Bodies are buffered whole before relay, so a chunked message is
//! decoded here and forwarded with a plain `Content-Length`.

use crate::http::parser::ParseError;

/// Decodes a complete chunked body from the start of `buf`.
///
/// Returns the decoded body and the number of bytes consumed, including
/// the terminating chunk and any trailers. `ParseError::Incomplete` means
/// more bytes are needed; a body that would grow past `limit` bytes is
/// `ParseError::BodyTooLarge` as soon as the offending size line is seen.
pub fn decode_chunked(buf: &[u8], limit: usize) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
        let size_line = std::str::from_utf8(&buf[pos..pos + line_end])
            .map_err(|_| ParseError::InvalidChunk)?;
        // chunk extensions follow a ';'
        let size_str = size_line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line_end + 2;

        if size == 0 {
            // trailers end with an empty line
            loop {
                let end = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
                pos += end + 2;
                if end == 0 {
                    return Ok((body, pos));
                }
            }
        }

        let total = body.len().checked_add(size).ok_or(ParseError::InvalidChunk)?;
        if total > limit {
            return Err(ParseError::BodyTooLarge);
        }

        let data_end = pos.checked_add(size).ok_or(ParseError::InvalidChunk)?;
        let chunk_end = data_end.checked_add(2).ok_or(ParseError::InvalidChunk)?;
        if buf.len() < chunk_end {
            return Err(ParseError::Incomplete);
        }

        body.extend_from_slice(&buf[pos..data_end]);
        if &buf[data_end..chunk_end] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        pos = chunk_end;
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: usize = 1024;

    #[test]
    fn decodes_two_chunks() {
        let raw = b"4\r\nWiki\r\n5;ext=1\r\npedia\r\n0\r\n\r\nrest";
        let (body, consumed) = decode_chunked(raw, LIMIT).unwrap();

        assert_eq!(body, b"Wikipedia");
        assert_eq!(&raw[consumed..], b"rest");
    }

    #[test]
    fn skips_trailers() {
        let raw = b"1\r\na\r\n0\r\nX-Trailer: yes\r\n\r\n";
        let (body, consumed) = decode_chunked(raw, LIMIT).unwrap();

        assert_eq!(body, b"a");
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn partial_input_is_incomplete() {
        assert!(matches!(decode_chunked(b"4\r\nWi", LIMIT), Err(ParseError::Incomplete)));
        assert!(matches!(decode_chunked(b"4\r\nWiki\r\n", LIMIT), Err(ParseError::Incomplete)));
    }

    #[test]
    fn bad_size_is_rejected() {
        assert!(matches!(decode_chunked(b"zz\r\n", LIMIT), Err(ParseError::InvalidChunk)));
    }

    #[test]
    fn huge_chunk_size_does_not_overflow() {
        let raw = b"ffffffffffffffff\r\nabc\r\n0\r\n\r\n";

        assert!(matches!(decode_chunked(raw, LIMIT), Err(ParseError::BodyTooLarge)));
        assert!(matches!(decode_chunked(raw, usize::MAX), Err(ParseError::InvalidChunk)));
    }

    #[test]
    fn body_over_limit_is_rejected_before_data_arrives() {
        assert!(matches!(decode_chunked(b"401\r\n", LIMIT), Err(ParseError::BodyTooLarge)));
        assert!(matches!(
            decode_chunked(b"200\r\n", LIMIT),
            Err(ParseError::Incomplete)
        ));

        let mut raw = b"400\r\n".to_vec();
        raw.extend(std::iter::repeat_n(b'x', 0x400));
        raw.extend_from_slice(b"\r\n1\r\n");
        assert!(matches!(decode_chunked(&raw, LIMIT), Err(ParseError::BodyTooLarge)));
    }
}
