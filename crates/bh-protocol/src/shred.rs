//! Payload fragmentation and reassembly
//!
//! Bodies larger than the packet size cap are split into SHRED frames
//! sharing a session id, with 1-based indices and a common total. Each
//! fragment carries digests over its own bytes. Fragments may arrive in any
//! order; reassembly delivers the in-order concatenation once every index
//! is present.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::session::SessionId;

/// Default payload size cap before a chunk is fragmented
///
/// Inherited as an MTU hint from earlier deployments; with length-prefixed
/// bodies it is a tuning parameter, not a correctness requirement.
pub const MAX_PACKET_SIZE: usize = 384;

/// Split a body into fragments of at most `max` bytes
///
/// Returns one slice per fragment, in index order. Slicing shares the
/// underlying buffer, so no payload bytes are copied.
pub fn split_body(body: &Bytes, max: usize) -> Vec<Bytes> {
    assert!(max > 0, "fragment size cap must be positive");
    if body.is_empty() {
        return vec![body.clone()];
    }
    (0..body.len())
        .step_by(max)
        .map(|start| body.slice(start..body.len().min(start + max)))
        .collect()
}

/// Package one chunk read from a socket into frames for the control channel
///
/// A chunk within the cap becomes a single DATA frame; anything larger
/// becomes a SHRED sequence.
pub fn package_chunk(id: &SessionId, port: Option<u16>, chunk: Bytes, max: usize) -> Vec<Frame> {
    if chunk.len() <= max {
        return vec![Frame::Data {
            id: id.clone(),
            port,
            body: chunk,
        }];
    }
    let fragments = split_body(&chunk, max);
    let total = fragments.len() as u32;
    fragments
        .into_iter()
        .enumerate()
        .map(|(i, body)| Frame::Shred {
            id: id.clone(),
            port,
            index: i as u32 + 1,
            total,
            body,
        })
        .collect()
}

/// Reassembly buffer for one session's in-flight fragmented payload
#[derive(Debug)]
pub struct ShredBuffer {
    /// Declared fragment count, fixed by the first fragment seen
    total: u32,
    /// Fragments received so far, by 1-based index
    fragments: HashMap<u32, Bytes>,
}

impl ShredBuffer {
    /// Create a buffer expecting `total` fragments
    pub fn new(total: u32) -> Self {
        Self {
            total,
            fragments: HashMap::new(),
        }
    }

    /// Record one fragment
    ///
    /// Returns the joined payload once all fragments are present. A
    /// duplicate index overwrites the earlier fragment; an index beyond the
    /// total is dropped. A total that disagrees with the one on file is a
    /// protocol error; the caller must drop the buffer and close the
    /// session.
    pub fn insert(
        &mut self,
        index: u32,
        total: u32,
        body: Bytes,
    ) -> Result<Option<Bytes>, ProtocolError> {
        if total != self.total {
            return Err(ProtocolError::FragmentTotalConflict {
                expected: self.total,
                got: total,
            });
        }
        if index == 0 || index > self.total {
            return Ok(None);
        }
        self.fragments.insert(index, body);

        if self.fragments.len() as u32 != self.total {
            return Ok(None);
        }
        let size = self.fragments.values().map(|b| b.len()).sum();
        let mut joined = BytesMut::with_capacity(size);
        for index in 1..=self.total {
            joined.extend_from_slice(&self.fragments[&index]);
        }
        self.fragments.clear();
        Ok(Some(joined.freeze()))
    }

    /// Fragments received so far
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// Check if no fragments have arrived
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
