//! Frame variants and header encoding
//!
//! A frame is a line of space-separated ASCII header tokens, the configured
//! separator, and an optional binary body. The `port` token is present on
//! redirector-to-starter frames (it tells the starter which backend to dial)
//! and absent on the return path. DATA and SHRED headers end with the two
//! payload digests and the decimal body length.

use bytes::Bytes;

use crate::digest::{sha1_hex, sha512_hex};
use crate::packet::PacketType;
use crate::session::SessionId;

/// An application-layer message on the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Admission request: shared secret plus the advertised public ports
    Auth {
        secret: String,
        ports: Vec<u16>,
    },

    /// One payload chunk for a session
    Data {
        id: SessionId,
        port: Option<u16>,
        body: Bytes,
    },

    /// One fragment of an oversize payload; `index` is 1-based
    Shred {
        id: SessionId,
        port: Option<u16>,
        index: u32,
        total: u32,
        body: Bytes,
    },

    /// Session teardown notice
    Close { id: SessionId },
}

impl Frame {
    /// Get the packet type for this frame
    pub fn packet_type(&self) -> PacketType {
        match self {
            Frame::Auth { .. } => PacketType::Auth,
            Frame::Data { .. } => PacketType::Data,
            Frame::Shred { .. } => PacketType::Shred,
            Frame::Close { .. } => PacketType::Close,
        }
    }

    /// Session the frame addresses, if any
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Frame::Auth { .. } => None,
            Frame::Data { id, .. } | Frame::Shred { id, .. } | Frame::Close { id } => Some(id),
        }
    }

    /// Body bytes, empty for bodyless frames
    pub fn body(&self) -> &[u8] {
        match self {
            Frame::Data { body, .. } | Frame::Shred { body, .. } => body,
            _ => &[],
        }
    }

    /// Render the header token line, digests computed over the body
    pub(crate) fn encode_header(&self) -> String {
        match self {
            Frame::Auth { secret, ports } => {
                let ports = ports
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(";");
                format!("AUTH {} {}", secret, ports)
            }
            Frame::Data { id, port, body } => {
                let mut header = format!("DATA {}", id);
                if let Some(port) = port {
                    header.push_str(&format!(" {}", port));
                }
                header.push_str(&format!(
                    " {} {} {}",
                    sha1_hex(body),
                    sha512_hex(body),
                    body.len()
                ));
                header
            }
            Frame::Shred {
                id,
                port,
                index,
                total,
                body,
            } => {
                let mut header = format!("SHRED {}", id);
                if let Some(port) = port {
                    header.push_str(&format!(" {}", port));
                }
                header.push_str(&format!(
                    " {} {} {} {} {}",
                    sha1_hex(body),
                    sha512_hex(body),
                    index,
                    total,
                    body.len()
                ));
                header
            }
            Frame::Close { id } => format!("CLOSE {}", id),
        }
    }
}
