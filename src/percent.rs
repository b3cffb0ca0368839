//! RFC 3986 percent-encoding with selectable reservation policy.
//!
//! Transcoded paths are unescaped segment by segment. Single-segment bindings
//! decode every escape; bindings spanning several segments keep reserved
//! characters escaped so a decoded `%2F` can never be confused with a segment
//! separator.
//!
//! The `grpc-message` trailer uses its own, narrower encoding
//! ([`encode_grpc_message`] / [`decode_grpc_message`]).

/// Which characters an unescape (or escape) leaves in their `%XX` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnescapeSpec {
    /// Decode every valid escape.
    AllCharacters,
    /// Leave RFC 6570 reserved characters (`:/?#[]@!$&'()*+,;=`) escaped.
    AllCharactersExceptReserved,
    /// Leave only `/` escaped.
    AllCharactersExceptSlash,
}

impl UnescapeSpec {
    fn keeps_escaped(self, c: u8) -> bool {
        match self {
            Self::AllCharacters => false,
            Self::AllCharactersExceptReserved => is_reserved(c),
            Self::AllCharactersExceptSlash => c == b'/',
        }
    }
}

/// RFC 6570 reserved set (gen-delims + sub-delims).
#[inline]
pub fn is_reserved(c: u8) -> bool {
    matches!(
        c,
        b':' | b'/'
            | b'?'
            | b'#'
            | b'['
            | b']'
            | b'@'
            | b'!'
            | b'$'
            | b'&'
            | b'\''
            | b'('
            | b')'
            | b'*'
            | b'+'
            | b','
            | b';'
            | b'='
    )
}

/// RFC 3986 unreserved set.
#[inline]
pub fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~')
}

#[inline]
fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

const HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

/// Unescape `%XX` sequences in `input` according to `spec`.
///
/// Invalid escapes are copied through unchanged. With `unescape_plus`, a
/// literal `+` decodes to a space (form encoding, used for query values).
/// Bytes that do not form valid UTF-8 are replaced.
///
/// ```
/// use grpc_wire::percent::{unescape, UnescapeSpec};
///
/// assert_eq!(unescape("a%2Fb", UnescapeSpec::AllCharacters, false), "a/b");
/// assert_eq!(unescape("a%2Fb", UnescapeSpec::AllCharactersExceptReserved, false), "a%2Fb");
/// ```
pub fn unescape(input: &str, spec: UnescapeSpec, unescape_plus: bool) -> String {
    let bytes = input.as_bytes();
    if !bytes.contains(&b'%') && !(unescape_plus && bytes.contains(&b'+')) {
        return input.to_string();
    }

    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = (hi << 4) | lo;
                if spec.keeps_escaped(decoded) {
                    out.extend_from_slice(&bytes[i..i + 3]);
                } else {
                    out.push(decoded);
                }
                i += 3;
                continue;
            }
        }
        if c == b'+' && unescape_plus {
            out.push(b' ');
        } else {
            out.push(c);
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Escape every byte outside the unreserved set, except the characters that
/// `spec` says stay literal (reserved characters, or `/`).
///
/// ```
/// use grpc_wire::percent::{escape, UnescapeSpec};
///
/// assert_eq!(escape("a b/c", UnescapeSpec::AllCharacters), "a%20b%2Fc");
/// assert_eq!(escape("a b/c", UnescapeSpec::AllCharactersExceptSlash), "a%20b/c");
/// ```
pub fn escape(input: &str, spec: UnescapeSpec) -> String {
    let mut out = String::with_capacity(input.len());
    for &c in input.as_bytes() {
        if is_unreserved(c) || spec.keeps_escaped(c) {
            out.push(c as char);
        } else {
            push_escaped(&mut out, c);
        }
    }
    out
}

#[inline]
fn push_escaped(out: &mut String, c: u8) {
    out.push('%');
    out.push(HEX_UPPER[(c >> 4) as usize] as char);
    out.push(HEX_UPPER[(c & 0x0F) as usize] as char);
}

/// Percent-encode a status message for the `grpc-message` trailer.
///
/// Printable ASCII other than `%` passes through; everything else (including
/// each byte of multi-byte UTF-8 sequences) becomes `%XX`.
pub fn encode_grpc_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &c in message.as_bytes() {
        if (0x20..=0x7E).contains(&c) && c != b'%' {
            out.push(c as char);
        } else {
            push_escaped(&mut out, c);
        }
    }
    out
}

/// Decode a `grpc-message` value. Malformed escapes are kept verbatim.
pub fn decode_grpc_message(value: &str) -> String {
    unescape(value, UnescapeSpec::AllCharacters, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_all_characters() {
        assert_eq!(unescape("hello%20world", UnescapeSpec::AllCharacters, false), "hello world");
        assert_eq!(unescape("%2F%3A%40", UnescapeSpec::AllCharacters, false), "/:@");
    }

    #[test]
    fn test_unescape_except_reserved() {
        let spec = UnescapeSpec::AllCharactersExceptReserved;
        assert_eq!(unescape("a%2Fb%20c", spec, false), "a%2Fb c");
        assert_eq!(unescape("%3a%41", spec, false), "%3aA");
    }

    #[test]
    fn test_unescape_except_slash() {
        let spec = UnescapeSpec::AllCharactersExceptSlash;
        assert_eq!(unescape("a%2Fb%3Ac", spec, false), "a%2Fb:c");
    }

    #[test]
    fn test_unescape_invalid_sequences_pass_through() {
        let spec = UnescapeSpec::AllCharacters;
        assert_eq!(unescape("100%", spec, false), "100%");
        assert_eq!(unescape("%zz", spec, false), "%zz");
        assert_eq!(unescape("%4", spec, false), "%4");
        assert_eq!(unescape("ab%4", spec, false), "ab%4");
    }

    #[test]
    fn test_unescape_plus() {
        let spec = UnescapeSpec::AllCharacters;
        assert_eq!(unescape("a+b", spec, true), "a b");
        assert_eq!(unescape("a+b", spec, false), "a+b");
        assert_eq!(unescape("a%2Bb", spec, true), "a+b");
    }

    #[test]
    fn test_unescape_utf8() {
        assert_eq!(unescape("caf%C3%A9", UnescapeSpec::AllCharacters, false), "café");
    }

    #[test]
    fn test_escape_policies() {
        assert_eq!(escape("a:b", UnescapeSpec::AllCharacters), "a%3Ab");
        assert_eq!(escape("a:b", UnescapeSpec::AllCharactersExceptReserved), "a:b");
        assert_eq!(escape("é", UnescapeSpec::AllCharacters), "%C3%A9");
        assert_eq!(escape("safe-._~", UnescapeSpec::AllCharacters), "safe-._~");
    }

    #[test]
    fn test_escape_then_unescape() {
        let original = "path with/odd:chars?&";
        let escaped = escape(original, UnescapeSpec::AllCharacters);
        assert_eq!(unescape(&escaped, UnescapeSpec::AllCharacters, false), original);
    }

    #[test]
    fn test_grpc_message_encoding() {
        assert_eq!(encode_grpc_message("plain text"), "plain text");
        assert_eq!(encode_grpc_message("50%"), "50%25");
        assert_eq!(encode_grpc_message("line\nbreak"), "line%0Abreak");
        assert_eq!(encode_grpc_message("résumé"), "r%C3%A9sum%C3%A9");
        assert_eq!(decode_grpc_message("r%C3%A9sum%C3%A9"), "résumé");
        assert_eq!(decode_grpc_message("bad %G0 escape"), "bad %G0 escape");
    }
}
