//! The Gateway crate (spec §4.7 "C7 Gateway"): wires the Lane Queue,
//! Bindings Router, Session Manager, Part Folder, Card Streamer, and
//! protocol handlers (Question Protocol, Sub-task Tracker, Recall
//! Handler) into one message-in -> card-out pipeline.

pub mod commands;
pub mod gateway;
pub mod policy;

pub use commands::{CommandDispatcher, CommandOutcome, NoopCommandDispatcher};
pub use gateway::Gateway;
pub use policy::{ChatPolicy, DmPolicy, GroupPolicy};
