//! Session identity, transcript reconciliation and command dispatch.
//!
//! Provides:
//! - `ConsoleClient` - State container tying identity, stream and transcript together
//! - `Reconciler` - Merge of push messages and responses into the transcript
//! - `SessionIdentity` - Session token lifecycle
//! - Storage implementations (memory, file)

pub mod client;
pub mod dispatcher;
pub mod identity;
pub mod persist;
pub mod reconciler;
pub mod storage;

pub use client::ConsoleClient;
#[cfg(all(feature = "http", feature = "file"))]
pub use client::BuildError;
pub use dispatcher::{CommandOutcome, DispatchError};
pub use identity::{Ensured, SessionError, SessionIdentity};
pub use reconciler::{CommandEntries, Reconciler};
