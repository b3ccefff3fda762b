//! Session identifier type

use std::fmt;

use uuid::Uuid;

use crate::error::ProtocolError;

/// Byte offsets of the four hyphens in the textual UUID form
const HYPHEN_OFFSETS: [usize; 4] = [8, 13, 18, 23];

/// Unique identifier for a tunneled session
///
/// Carried on the wire in textual UUID form: 36 characters, five
/// hyphen-delimited groups. The redirector assigns ids; the starter treats
/// them as opaque, so validation checks only the shape, not the UUID
/// version or variant bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Length of the textual form in bytes
    pub const LEN: usize = 36;

    /// Generate a fresh random id (UUID v4)
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an id token received on the wire
    pub fn parse(token: &str) -> Result<Self, ProtocolError> {
        if token.len() != Self::LEN {
            return Err(ProtocolError::InvalidSessionId(token.to_string()));
        }
        for (offset, byte) in token.bytes().enumerate() {
            let expect_hyphen = HYPHEN_OFFSETS.contains(&offset);
            if (byte == b'-') != expect_hyphen {
                return Err(ProtocolError::InvalidSessionId(token.to_string()));
            }
        }
        Ok(Self(token.to_string()))
    }

    /// Get the textual form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_id_parses() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), SessionId::LEN);
        let parsed = SessionId::parse(id.as_str()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(SessionId::parse("too-short").is_err());
        assert!(SessionId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_misplaced_hyphens() {
        // Right length, hyphens in the wrong places
        let token = "0123456789abcdef0123456789abcdef0123";
        assert_eq!(token.len(), SessionId::LEN);
        assert!(SessionId::parse(token).is_err());

        let shifted = "01234567-89ab-cdef-0123-456789abcde-";
        assert_eq!(shifted.len(), SessionId::LEN);
        assert!(SessionId::parse(shifted).is_err());
    }

    #[test]
    fn test_parse_accepts_shape_without_version_bits() {
        // Not a valid UUID v4, but the shape is right
        let token = "zzzzzzzz-zzzz-zzzz-zzzz-zzzzzzzzzzzz";
        assert!(SessionId::parse(token).is_ok());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }
}
