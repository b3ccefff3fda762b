//! bh-protocol: Wire protocol for backhaul session multiplexing
//!
//! This crate defines the framed protocol spoken on the control channel
//! between the starter and the redirector: packet types, header layout,
//! payload digests, the stream codec, and fragmentation/reassembly.

pub mod codec;
pub mod digest;
pub mod error;
pub mod frame;
pub mod packet;
pub mod session;
pub mod shred;

pub use codec::{FrameCodec, MAX_BODY_SIZE, MAX_HEADER_SIZE};
pub use error::ProtocolError;
pub use frame::Frame;
pub use packet::PacketType;
pub use session::SessionId;
pub use shred::{package_chunk, split_body, ShredBuffer, MAX_PACKET_SIZE};
