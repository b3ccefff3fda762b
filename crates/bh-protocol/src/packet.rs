//! Packet type tokens

/// Packet type identifier, the first header token of every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Control-session admission: secret plus advertised ports
    Auth,
    /// One payload chunk for a session
    Data,
    /// One fragment of a payload too large for a single DATA frame
    Shred,
    /// Session teardown notice
    Close,
}

impl PacketType {
    /// Wire token for this packet type
    pub fn as_token(&self) -> &'static str {
        match self {
            PacketType::Auth => "AUTH",
            PacketType::Data => "DATA",
            PacketType::Shred => "SHRED",
            PacketType::Close => "CLOSE",
        }
    }

    /// Parse a wire token
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "AUTH" => Some(Self::Auth),
            "DATA" => Some(Self::Data),
            "SHRED" => Some(Self::Shred),
            "CLOSE" => Some(Self::Close),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        for packet in [
            PacketType::Auth,
            PacketType::Data,
            PacketType::Shred,
            PacketType::Close,
        ] {
            let token = packet.as_token();
            let recovered = PacketType::from_token(token).unwrap();
            assert_eq!(recovered, packet);
        }
    }

    #[test]
    fn test_end_is_not_a_packet_type() {
        // END appears in some historical captures but is never emitted
        // and must not be accepted.
        assert!(PacketType::from_token("END").is_none());
    }

    #[test]
    fn test_tokens_are_case_sensitive() {
        assert!(PacketType::from_token("data").is_none());
        assert!(PacketType::from_token("Auth").is_none());
    }
}
