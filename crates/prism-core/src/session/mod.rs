//! Session - Conversation state per session identifier
//!
//! Holds ordered turn history and the in-flight step counter. Every task
//! mutates its session through a [`SessionLease`] taken from the
//! [`SessionStore`].

/// Store and lane implementation.
pub mod store;
/// Turn and session data types.
pub mod turn;

pub use store::{SessionLease, SessionStore};
pub use turn::{FailureKind, NewTurn, Session, Turn, TurnRole};
