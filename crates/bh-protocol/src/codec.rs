//! Tokio codec for control-channel frames
//!
//! TCP delivers a byte stream, so the decoder never assumes one write
//! became one read: it appends into the receive buffer, scans for the
//! configured separator, and reads exactly the body length declared in the
//! header. Frames with corrupt payload digests or unparsable headers are
//! discarded without disturbing the rest of the stream.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::digest::{sha1_hex, sha512_hex, SHA1_HEX_LEN, SHA512_HEX_LEN};
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::packet::PacketType;
use crate::session::SessionId;

/// Maximum header size scanned for a separator
pub const MAX_HEADER_SIZE: usize = 8192;

/// Maximum declared body length the decoder will buffer
pub const MAX_BODY_SIZE: usize = 0x00FF_FFFF;

/// Header fields of a DATA or SHRED frame whose body has not arrived yet
#[derive(Debug)]
struct BodyHeader {
    packet: PacketType,
    id: SessionId,
    port: Option<u16>,
    sha1: String,
    sha512: String,
    /// `(index, total)` for SHRED, `None` for DATA
    fragment: Option<(u32, u32)>,
    body_len: usize,
}

impl BodyHeader {
    /// Validate the digests and build the frame
    fn into_frame(self, body: Bytes) -> Result<Frame, ProtocolError> {
        if sha1_hex(&body) != self.sha1 {
            return Err(ProtocolError::DigestMismatch {
                algorithm: "SHA-1",
                packet: self.packet.as_token(),
            });
        }
        if sha512_hex(&body) != self.sha512 {
            return Err(ProtocolError::DigestMismatch {
                algorithm: "SHA-512",
                packet: self.packet.as_token(),
            });
        }
        Ok(match self.fragment {
            None => Frame::Data {
                id: self.id,
                port: self.port,
                body,
            },
            Some((index, total)) => Frame::Shred {
                id: self.id,
                port: self.port,
                index,
                total,
                body,
            },
        })
    }
}

/// Decoder state carried between reads
#[derive(Debug)]
enum Pending {
    /// Header parsed, waiting for `body_len` bytes
    Deliver(BodyHeader),
    /// Malformed header with a salvageable length; body bytes are dropped
    /// incrementally so a bogus length cannot exhaust memory
    Discard { remaining: usize },
}

/// Result of parsing one header line
enum ParsedHeader {
    /// Bodyless frame, complete as-is
    Frame(Frame),
    /// Body follows
    Body(BodyHeader),
}

/// Codec for encoding/decoding control-channel frames
#[derive(Debug)]
pub struct FrameCodec {
    /// Configured separator between header and body
    separator: Bytes,
    /// Partially decoded frame, if any
    pending: Option<Pending>,
}

impl FrameCodec {
    /// Create a codec with the configured separator
    ///
    /// The separator must be non-empty and must not collide with header
    /// token bytes; configuration validation enforces this before a codec
    /// is ever constructed.
    pub fn new(separator: impl Into<Bytes>) -> Self {
        Self {
            separator: separator.into(),
            pending: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        loop {
            match self.pending.take() {
                Some(Pending::Discard { remaining }) => {
                    let n = remaining.min(src.len());
                    src.advance(n);
                    let remaining = remaining - n;
                    if remaining > 0 {
                        self.pending = Some(Pending::Discard { remaining });
                        return Ok(None);
                    }
                    continue;
                }
                Some(Pending::Deliver(header)) => {
                    if src.len() < header.body_len {
                        self.pending = Some(Pending::Deliver(header));
                        return Ok(None);
                    }
                    let body = src.split_to(header.body_len).freeze();
                    match header.into_frame(body) {
                        Ok(frame) => return Ok(Some(frame)),
                        Err(e) => {
                            tracing::warn!("Dropping frame with corrupt payload: {}", e);
                            continue;
                        }
                    }
                }
                None => {}
            }

            let Some(pos) = find_separator(src, &self.separator) else {
                if src.len() > MAX_HEADER_SIZE + self.separator.len() {
                    return Err(ProtocolError::HeaderTooLong {
                        max: MAX_HEADER_SIZE,
                    });
                }
                return Ok(None);
            };
            let header_bytes = src.split_to(pos);
            src.advance(self.separator.len());

            match parse_header(&header_bytes) {
                Ok(ParsedHeader::Frame(frame)) => return Ok(Some(frame)),
                Ok(ParsedHeader::Body(header)) => {
                    if header.body_len > MAX_BODY_SIZE {
                        return Err(ProtocolError::PayloadTooLarge {
                            size: header.body_len,
                            max: MAX_BODY_SIZE,
                        });
                    }
                    self.pending = Some(Pending::Deliver(header));
                }
                Err(e) => {
                    tracing::warn!("Discarding malformed frame header: {}", e);
                    if let Some(remaining) = salvage_body_len(&header_bytes) {
                        self.pending = Some(Pending::Discard { remaining });
                    }
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body_len = frame.body().len();
        if body_len > MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: body_len,
                max: MAX_BODY_SIZE,
            });
        }

        let header = frame.encode_header();
        dst.reserve(header.len() + self.separator.len() + body_len);
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&self.separator);
        dst.extend_from_slice(frame.body());
        Ok(())
    }
}

/// Find the first occurrence of the separator in the buffer
fn find_separator(haystack: &[u8], separator: &[u8]) -> Option<usize> {
    if separator.is_empty() || haystack.len() < separator.len() {
        return None;
    }
    haystack
        .windows(separator.len())
        .position(|window| window == separator)
}

/// Parse one header line into a frame or a pending body header
fn parse_header(header: &[u8]) -> Result<ParsedHeader, ProtocolError> {
    let header = std::str::from_utf8(header)
        .map_err(|_| ProtocolError::InvalidHeader("header is not valid UTF-8".to_string()))?;
    let tokens: Vec<&str> = header.split(' ').collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(ProtocolError::InvalidHeader(format!(
            "empty token in header {:?}",
            header
        )));
    }

    let packet = PacketType::from_token(tokens[0])
        .ok_or_else(|| ProtocolError::UnknownPacketType(tokens[0].to_string()))?;

    match packet {
        PacketType::Auth => {
            if tokens.len() != 3 {
                return Err(invalid_arity(packet, tokens.len()));
            }
            let ports = tokens[2]
                .split(';')
                .map(|p| {
                    p.parse::<u16>().map_err(|_| {
                        ProtocolError::InvalidHeader(format!("bad port token {:?}", p))
                    })
                })
                .collect::<Result<Vec<u16>, _>>()?;
            Ok(ParsedHeader::Frame(Frame::Auth {
                secret: tokens[1].to_string(),
                ports,
            }))
        }
        PacketType::Close => {
            if tokens.len() != 2 {
                return Err(invalid_arity(packet, tokens.len()));
            }
            Ok(ParsedHeader::Frame(Frame::Close {
                id: SessionId::parse(tokens[1])?,
            }))
        }
        PacketType::Data => {
            // DATA <id> [<port>] <sha1> <sha512> <body_len>
            let port = match tokens.len() {
                5 => None,
                6 => Some(parse_port(tokens[2])?),
                n => return Err(invalid_arity(packet, n)),
            };
            let rest = &tokens[tokens.len() - 3..];
            Ok(ParsedHeader::Body(BodyHeader {
                packet,
                id: SessionId::parse(tokens[1])?,
                port,
                sha1: parse_digest(rest[0], SHA1_HEX_LEN)?,
                sha512: parse_digest(rest[1], SHA512_HEX_LEN)?,
                fragment: None,
                body_len: parse_len(rest[2])?,
            }))
        }
        PacketType::Shred => {
            // SHRED <id> [<port>] <sha1> <sha512> <n> <total> <body_len>
            let port = match tokens.len() {
                7 => None,
                8 => Some(parse_port(tokens[2])?),
                n => return Err(invalid_arity(packet, n)),
            };
            let rest = &tokens[tokens.len() - 5..];
            let index = parse_count(rest[2])?;
            let total = parse_count(rest[3])?;
            Ok(ParsedHeader::Body(BodyHeader {
                packet,
                id: SessionId::parse(tokens[1])?,
                port,
                sha1: parse_digest(rest[0], SHA1_HEX_LEN)?,
                sha512: parse_digest(rest[1], SHA512_HEX_LEN)?,
                fragment: Some((index, total)),
                body_len: parse_len(rest[4])?,
            }))
        }
    }
}

fn invalid_arity(packet: PacketType, got: usize) -> ProtocolError {
    ProtocolError::InvalidHeader(format!("{} header with {} tokens", packet, got))
}

fn parse_port(token: &str) -> Result<u16, ProtocolError> {
    token
        .parse::<u16>()
        .map_err(|_| ProtocolError::InvalidHeader(format!("bad port token {:?}", token)))
}

fn parse_digest(token: &str, expected_len: usize) -> Result<String, ProtocolError> {
    if token.len() != expected_len || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(ProtocolError::InvalidHeader(format!(
            "bad digest token of length {}",
            token.len()
        )));
    }
    Ok(token.to_string())
}

fn parse_len(token: &str) -> Result<usize, ProtocolError> {
    token
        .parse::<usize>()
        .map_err(|_| ProtocolError::InvalidHeader(format!("bad body length token {:?}", token)))
}

/// Fragment index or total, 1-based
fn parse_count(token: &str) -> Result<u32, ProtocolError> {
    let count = token
        .parse::<u32>()
        .map_err(|_| ProtocolError::InvalidHeader(format!("bad fragment count {:?}", token)))?;
    if count == 0 {
        return Err(ProtocolError::InvalidHeader(
            "fragment counts are 1-based".to_string(),
        ));
    }
    Ok(count)
}

/// Best-effort body length recovery for a malformed DATA/SHRED header, so
/// the stream can resync past the unreadable body
fn salvage_body_len(header: &[u8]) -> Option<usize> {
    let header = std::str::from_utf8(header).ok()?;
    let mut tokens = header.split(' ');
    let first = tokens.next()?;
    if first != "DATA" && first != "SHRED" {
        return None;
    }
    tokens.next_back()?.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEP: &str = "\r\n";

    fn codec() -> FrameCodec {
        FrameCodec::new(SEP)
    }

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        codec().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_auth_roundtrip() {
        let frame = Frame::Auth {
            secret: "hunter2".to_string(),
            ports: vec![8080, 8081],
        };
        let mut buf = encode(frame.clone());
        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_data_roundtrip_both_arities() {
        for port in [Some(8080), None] {
            let frame = Frame::Data {
                id: SessionId::generate(),
                port,
                body: Bytes::from_static(b"GET / HTTP/1.0\r\n\r\n"),
            };
            let mut buf = encode(frame.clone());
            let decoded = codec().decode(&mut buf).unwrap().unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn test_shred_roundtrip() {
        let frame = Frame::Shred {
            id: SessionId::generate(),
            port: Some(9000),
            index: 2,
            total: 3,
            body: Bytes::from_static(b"fragment"),
        };
        let mut buf = encode(frame.clone());
        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_body_may_contain_separator() {
        // The declared length, not separator scanning, bounds the body
        let frame = Frame::Data {
            id: SessionId::generate(),
            port: None,
            body: Bytes::from_static(b"first\r\nsecond\r\n"),
        };
        let mut buf = encode(frame.clone());
        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_split_reads() {
        let frame = Frame::Data {
            id: SessionId::generate(),
            port: Some(8080),
            body: Bytes::from_static(b"payload bytes"),
        };
        let full = encode(frame.clone());

        let mut codec = codec();
        let mut buf = BytesMut::new();
        for chunk in full.chunks(7) {
            buf.extend_from_slice(chunk);
            if let Some(decoded) = codec.decode(&mut buf).unwrap() {
                assert_eq!(decoded, frame);
                return;
            }
        }
        panic!("frame never completed");
    }

    #[test]
    fn test_coalesced_frames() {
        let id = SessionId::generate();
        let first = Frame::Data {
            id: id.clone(),
            port: None,
            body: Bytes::from_static(b"one"),
        };
        let second = Frame::Close { id };

        let mut buf = encode(first.clone());
        buf.extend_from_slice(&encode(second.clone()));

        let mut codec = codec();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_sha1_drops_frame_only() {
        let id = SessionId::generate();
        let body = b"important bytes";
        // Flip one hex digit of the SHA-1
        let mut sha1 = sha1_hex(body);
        let flipped = if sha1.starts_with('0') { "1" } else { "0" };
        sha1.replace_range(0..1, flipped);
        let header = format!("DATA {} {} {} {}", id, sha1, sha512_hex(body), body.len());

        let mut buf = BytesMut::new();
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(SEP.as_bytes());
        buf.extend_from_slice(body);

        // Followed by an intact frame on the same stream
        let good = Frame::Data {
            id,
            port: None,
            body: Bytes::from_static(b"later"),
        };
        buf.extend_from_slice(&encode(good.clone()));

        let mut codec = codec();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, good);
    }

    #[test]
    fn test_unknown_packet_type_is_skipped() {
        let id = SessionId::generate();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("END {}{}", id, SEP).as_bytes());
        buf.extend_from_slice(&encode(Frame::Close { id: id.clone() }));

        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Frame::Close { id });
    }

    #[test]
    fn test_malformed_header_resyncs_past_body() {
        // Unparsable digest tokens, but a readable trailing length: the
        // decoder must skip exactly that many body bytes
        let id = SessionId::generate();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("DATA {} nothex alsonothex 11{}", id, SEP).as_bytes());
        buf.extend_from_slice(b"garbagebody");
        buf.extend_from_slice(&encode(Frame::Close { id: id.clone() }));

        let mut codec = codec();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Frame::Close { id });
    }

    #[test]
    fn test_empty_auth_port_list_is_malformed() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(format!("AUTH hunter2 {}", SEP).as_bytes());
        // Trailing space makes an empty token; the frame is discarded
        assert!(codec().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_header_too_long_is_fatal() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&vec![b'A'; MAX_HEADER_SIZE + 16]);
        let result = codec().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::HeaderTooLong { .. })));
    }

    #[test]
    fn test_oversize_body_len_is_fatal() {
        let id = SessionId::generate();
        let body = b"x";
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            format!(
                "DATA {} {} {} {}{}",
                id,
                sha1_hex(body),
                sha512_hex(body),
                MAX_BODY_SIZE + 1,
                SEP
            )
            .as_bytes(),
        );
        let result = codec().decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
    }

    #[test]
    fn test_zero_fragment_index_is_discarded() {
        let id = SessionId::generate();
        let body = b"frag";
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            format!(
                "SHRED {} {} {} 0 3 {}{}",
                id,
                sha1_hex(body),
                sha512_hex(body),
                body.len(),
                SEP
            )
            .as_bytes(),
        );
        buf.extend_from_slice(body);
        buf.extend_from_slice(&encode(Frame::Close { id: id.clone() }));

        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, Frame::Close { id });
    }

    #[test]
    fn test_empty_body_data_frame() {
        let frame = Frame::Data {
            id: SessionId::generate(),
            port: None,
            body: Bytes::new(),
        };
        let mut buf = encode(frame.clone());
        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
    }
}
