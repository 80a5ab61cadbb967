//! Shared domain types and collaborator contracts.
//!
//! This crate holds the types that cross subsystem boundaries: presence and
//! stream identifiers, the RPC status code surface, and the traits the match
//! registry depends on but does not implement (presence tracking, message
//! routing, match core instantiation).

mod error;
mod match_core;
mod presence;
mod tracker;

pub use error::ErrorCode;
pub use match_core::{CoreError, Flow, JoinDecision, MatchCore, MatchCreateFn, MatchDataMessage};
pub use presence::{MatchPresence, PresenceStream, StreamMode};
pub use tracker::{MessageRouter, Tracker};
