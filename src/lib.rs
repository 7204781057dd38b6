//! Sniffing proxy front-end
//!
//! Layout:
//! - `core/`: address codec, peek-and-replay stream, relay and hook traits
//! - `sniff/`: HTTP `Host` and TLS SNI extraction
//! - `transport/`: sower, trojan, socks5 and ssh wire handshakes
//! - `dialer`: upstream and direct dialers
//! - `router`: rule matching and dispatch
//! - `handler`: per-connection front-end logic
//! - `server_runner`: listeners and accept loops

pub mod config;
pub mod core;
pub mod dialer;
pub mod error;
pub mod handler;
pub mod logger;
pub mod router;
pub mod server_runner;
pub mod sniff;
pub mod transport;
pub mod utils;
