//! Alliance Memory: persistent relationships and encounter generation for NPCs.
//!
//! Records typed interactions between agents into an event-sourced ledger,
//! recalls relevant memories for a situation, turns relationship state into
//! scripted dialogue encounters, and delivers rate-limited agent-to-agent
//! conversation with delayed auto-replies.

pub mod core;
pub mod schema;

pub use crate::core::session::{AllianceSession, AllianceSessionBuilder, SessionError};
