//! Control-channel connector and reconnect loop

mod connector;

pub(crate) use connector::Connection;
pub use connector::{Starter, RECONNECT_DELAY};
