//! Node-local directory of live, stateful match sessions.
//!
//! Each match runs as a cooperative actor consuming ordered events through
//! bounded queues, publishes a searchable text label, and shuts down
//! gracefully within a deadline. The registry owns the handler directory
//! and coordinates shutdown; handlers own their match state exclusively;
//! the label index is shared under read/write synchronization.
//!
//! # Architecture
//!
//! ```text
//! gateway -> MatchRegistry -> MatchHandler (handle) -> MatchActor task
//!                 |                                        |
//!                 v                                        v
//!            LabelIndex  <---- label refresh ---------  MatchCore
//! ```

mod config;
mod error;
mod handler;
mod index;
mod message;
mod registry;

pub use config::MatchConfig;
pub use error::{RegistryError, Result};
pub use handler::{MatchHandler, PresenceList};
pub use index::{IndexEntry, LabelIndex, MAX_LABEL_SIZE};
pub use message::{JoinAttemptMsg, JoinMsg};
pub use registry::{MatchListing, MatchRegistry};
