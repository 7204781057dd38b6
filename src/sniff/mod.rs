//! Destination sniffing for the transparent front-ends
//!
//! Both sniffers read through a `PeekStream` so the consumed bytes can be
//! replayed to the upstream untouched.

mod http;
mod tls;

pub use http::{sniff_http, MAX_HEADER_SIZE};
pub use tls::sniff_tls;
