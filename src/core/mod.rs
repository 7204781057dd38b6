//! Core proxy module
//!
//! This module contains the protocol-independent pieces:
//! - Destination address codec
//! - Peek-and-replay stream
//! - Bidirectional relay
//! - Hook traits the front-ends dispatch through

pub mod address;
pub mod hooks;
mod peek;
mod relay;

pub use address::Address;
pub use hooks::{ProxyDial, Router};
pub use peek::PeekStream;
pub use relay::{relay, CopyResult};
