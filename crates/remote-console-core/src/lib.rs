//! Core abstractions for the remote command console client.
//!
//! This crate provides the fundamental building blocks:
//! - `Transcript` - Ordered, id-addressable conversation log
//! - `EventHub` - Broadcast of state changes to observers
//! - `ConsoleConfig` - Endpoint, timeout and state file settings
//! - Storage, remote API and push transport traits

pub mod config;
pub mod events;
pub mod traits;
pub mod transcript;

pub use config::ConsoleConfig;
pub use events::{ConsoleEvent, EventHub, StreamStatus};
pub use traits::{KeyValueStore, PushTransport, SessionApi};
pub use transcript::{Role, Transcript, TranscriptEntry};
