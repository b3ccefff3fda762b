//! bh-starter: Private-side daemon of the backhaul reverse tunnel
//!
//! Maintains the single outbound control connection to the redirector,
//! advertises the configured backend ports, and proxies each session to a
//! local backend chosen by target port.

pub mod session;
pub mod tunnel;

pub use tunnel::{Starter, RECONNECT_DELAY};
