//! bh-core: Shared foundation for the backhaul daemons
//!
//! Configuration loading and validation plus the error taxonomy used by
//! both the redirector and the starter.

pub mod config;
pub mod error;

pub use error::{ConfigError, CoreError};
