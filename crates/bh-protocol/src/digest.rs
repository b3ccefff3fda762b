//! Payload digest helpers
//!
//! DATA and SHRED frames carry lowercase-hex SHA-1 and SHA-512 digests of
//! their body. SHA-512 alone is strictly stronger; the pair is kept for
//! on-wire compatibility.

use sha1::Sha1;
use sha2::{Digest, Sha512};

/// Length of a lowercase-hex SHA-1 digest
pub const SHA1_HEX_LEN: usize = 40;

/// Length of a lowercase-hex SHA-512 digest
pub const SHA512_HEX_LEN: usize = 128;

/// SHA-1 of the body, lowercase hex
pub fn sha1_hex(body: &[u8]) -> String {
    hex::encode(Sha1::digest(body))
}

/// SHA-512 of the body, lowercase hex
pub fn sha512_hex(body: &[u8]) -> String {
    hex::encode(Sha512::digest(body))
}
