//! MCMP body parser.
//!
//! The body is an ASCII `k1=v1&k2=v2&…` string. `&` and `=` are the only
//! separators; senders percent-encode them inside values. Tokens are
//! percent-decoded after splitting, and a decoded token containing any of
//! `< > " '` CR or LF poisons the whole message.

use crate::error::McmpError;

/// Ordered key/value pairs of a parsed body. Keys repeat (multiple
/// `Alias`/`Context` groups in CONFIG) and order is significant.
pub type Pairs = Vec<(String, String)>;

/// Parse a request body into ordered pairs.
///
/// An empty body yields an empty list (a bare PING carries no fields);
/// an empty pair, a pair without `=`, or a forbidden decoded character
/// is a SYNTAX error.
pub fn parse_pairs(body: &str) -> Result<Pairs, McmpError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }

    let mut pairs = Vec::new();
    for segment in body.split('&') {
        let (key, value) = segment.split_once('=').ok_or_else(McmpError::mess_parse)?;
        pairs.push((decode(key)?, decode(value)?));
    }
    Ok(pairs)
}

/// Percent-decode one token. A `%` not followed by two hex digits is
/// kept literally.
fn decode(token: &str) -> Result<String, McmpError> {
    let bytes = token.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let ch = if bytes[i] == b'%' {
            match (hex_val(bytes.get(i + 1)), hex_val(bytes.get(i + 2))) {
                (Some(hi), Some(lo)) => {
                    i += 3;
                    hi << 4 | lo
                }
                _ => {
                    i += 1;
                    b'%'
                }
            }
        } else {
            let b = bytes[i];
            i += 1;
            b
        };

        // Decoded separators are legal; markup and line breaks are not.
        if matches!(ch, b'<' | b'>' | b'"' | b'\'' | b'\r' | b'\n') {
            return Err(McmpError::mess_parse());
        }
        out.push(ch);
    }

    String::from_utf8(out).map_err(|_| McmpError::mess_parse())
}

fn hex_val(byte: Option<&u8>) -> Option<u8> {
    match byte? {
        b @ b'0'..=b'9' => Some(b - b'0'),
        b @ b'a'..=b'f' => Some(b - b'a' + 10),
        b @ b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Case-insensitive key comparison; MCMP keys are not case-sensitive.
pub fn key_is(key: &str, name: &str) -> bool {
    key.eq_ignore_ascii_case(name)
}

/// First element of a comma-separated list.
pub fn first_of_list(list: &str) -> &str {
    list.split(',').next().unwrap_or(list)
}
