//! Chimera Core Types
//!
//! This crate defines the data structures shared by the Chimera relay manager:
//! forwarding rules, public port specifications and the tunnel config documents
//! consumed by the relay binary.

mod config;
mod error;
mod ports;
mod rule;

pub use config::*;
pub use error::*;
pub use ports::*;
pub use rule::*;
