//! Shared error taxonomy (see spec §7: "Error taxonomy (kind, not type)").

use thiserror::Error;

use crate::session_key::SessionKeyError;

/// Errors surfaced by the core domain layer itself (not by any single
/// component — those define their own leaf error enums and wrap these
/// where they cross a boundary).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid session key: {0}")]
    InvalidSessionKey(#[from] SessionKeyError),

    #[error("configured agent id {0:?} is unknown")]
    AgentNotFound(String),
}
