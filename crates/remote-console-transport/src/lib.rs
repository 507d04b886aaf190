//! Transport layer for the remote command console.
//!
//! Provides:
//! - Push message decoding
//! - `StreamConnection` - reconnecting push stream state machine
//! - HTTP session API and SSE push transport (feature: http)

pub mod protocol;
pub mod stream;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub mod sse;

pub use protocol::{Inbound, PushMessage, decode_push};
pub use stream::{StreamConnection, StreamDelivery, UnsupportedTransport, reconnect_delay};
