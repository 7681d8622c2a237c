//! NTLM / Negotiate pass-through support.
//!
//! Windows-domain handshakes break when several challenges arrive folded
//! into one `WWW-Authenticate` line, so the backend's comma-joined value is
//! split back into one header line per challenge.

use crate::http::headers::Headers;

const WWW_AUTHENTICATE: &str = "WWW-Authenticate";

/// Splits every `WWW-Authenticate` value on `,` into separate lines.
///
/// Other headers keep their values and relative order. Pieces are trimmed
/// and empty pieces dropped.
pub fn split_www_authenticate(headers: &mut Headers) {
    let challenges: Vec<String> = headers
        .get_all(WWW_AUTHENTICATE)
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect();

    if challenges.is_empty() {
        return;
    }

    headers.remove(WWW_AUTHENTICATE);
    for challenge in challenges {
        headers.append(WWW_AUTHENTICATE, challenge);
    }
}
