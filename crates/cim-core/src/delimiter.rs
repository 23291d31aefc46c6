//! Delimiter framing for endpoint sockets.
//!
//! The wire protocol carries no length prefix and no envelope: message
//! boundaries are marked by a per-endpoint byte sequence. The delimiter
//! is therefore a first-class endpoint property, configured at
//! registration and carried in the registry record.

use std::fmt;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A message-framing byte sequence.
///
/// Parsed from CLI/registry notation where backslash escapes are
/// literal text (`ci-tool -d '\n'` arrives as backslash-n, not a
/// newline). Defaults to a single newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiter(Vec<u8>);

impl Delimiter {
    /// Creates a delimiter from raw bytes.
    ///
    /// Returns `None` for an empty sequence (an empty delimiter can
    /// never mark a boundary).
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Option<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            None
        } else {
            Some(Self(bytes))
        }
    }

    /// Parses escaped notation: `\n`, `\r`, `\t`, `\0` and `\\` are
    /// decoded, everything else is taken literally.
    ///
    /// Returns `None` if the decoded sequence is empty.
    pub fn parse(notation: &str) -> Option<Self> {
        let mut bytes = Vec::with_capacity(notation.len());
        let mut chars = notation.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('n') => bytes.push(b'\n'),
                    Some('r') => bytes.push(b'\r'),
                    Some('t') => bytes.push(b'\t'),
                    Some('0') => bytes.push(0),
                    Some('\\') => bytes.push(b'\\'),
                    Some(other) => {
                        // Unknown escape: keep both characters literally
                        bytes.push(b'\\');
                        let mut buf = [0u8; 4];
                        bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                    None => bytes.push(b'\\'),
                }
            } else {
                let mut buf = [0u8; 4];
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        Self::from_bytes(bytes)
    }

    /// The raw framing bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the framing sequence in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Delimiters are never empty, but clippy wants the pair.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Finds the first occurrence of the delimiter in `haystack`,
    /// returning the offset of its first byte.
    pub fn find(&self, haystack: &[u8]) -> Option<usize> {
        if haystack.len() < self.0.len() {
            return None;
        }
        haystack
            .windows(self.0.len())
            .position(|window| window == self.0.as_slice())
    }

    /// Escaped notation form (`\n`, `\r\n`, ...), suitable for display
    /// and persistence.
    pub fn notation(&self) -> String {
        let mut out = String::new();
        for &b in &self.0 {
            match b {
                b'\n' => out.push_str("\\n"),
                b'\r' => out.push_str("\\r"),
                b'\t' => out.push_str("\\t"),
                0 => out.push_str("\\0"),
                b'\\' => out.push_str("\\\\"),
                other => out.push(other as char),
            }
        }
        out
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Self(vec![b'\n'])
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.notation())
    }
}

// Persist as escaped notation so registry records stay human-readable.
impl Serialize for Delimiter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.notation())
    }
}

impl<'de> Deserialize<'de> for Delimiter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let notation = String::deserialize(deserializer)?;
        Self::parse(&notation).ok_or_else(|| D::Error::custom("empty delimiter"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_newline() {
        assert_eq!(Delimiter::default().as_bytes(), b"\n");
    }

    #[test]
    fn test_parse_escapes() {
        assert_eq!(Delimiter::parse("\\n").map(|d| d.as_bytes().to_vec()), Some(b"\n".to_vec()));
        assert_eq!(
            Delimiter::parse("\\r\\n").map(|d| d.as_bytes().to_vec()),
            Some(b"\r\n".to_vec())
        );
        assert_eq!(Delimiter::parse("\\t").map(|d| d.as_bytes().to_vec()), Some(b"\t".to_vec()));
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(
            Delimiter::parse("EOF").map(|d| d.as_bytes().to_vec()),
            Some(b"EOF".to_vec())
        );
    }

    #[test]
    fn test_parse_empty_rejected() {
        assert!(Delimiter::parse("").is_none());
        assert!(Delimiter::from_bytes(Vec::new()).is_none());
    }

    #[test]
    fn test_find() {
        let d = Delimiter::parse("\\r\\n").expect("delimiter");
        assert_eq!(d.find(b"hello\r\nworld"), Some(5));
        assert_eq!(d.find(b"hello\nworld"), None);
        assert_eq!(d.find(b""), None);
    }

    #[test]
    fn test_find_at_start() {
        let d = Delimiter::default();
        assert_eq!(d.find(b"\nrest"), Some(0));
    }

    #[test]
    fn test_notation_round_trip() {
        for notation in ["\\n", "\\r\\n", "\\t", "END", "\\\\x"] {
            let d = Delimiter::parse(notation).expect("delimiter");
            let back = Delimiter::parse(&d.notation()).expect("delimiter");
            assert_eq!(d, back, "notation {notation}");
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let d = Delimiter::parse("\\r\\n").expect("delimiter");
        let json = serde_json::to_string(&d).expect("serialize");
        assert_eq!(json, "\"\\\\r\\\\n\"");
        let back: Delimiter = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(d, back);
    }
}
