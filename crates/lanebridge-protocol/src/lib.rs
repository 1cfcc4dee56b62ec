//! Question Protocol, Sub-task Tracker, and Recall Handler (spec §4.6,
//! §4.8, §4.9) — the three components that correlate the Gateway's live
//! per-chat state against events arriving off the agent's event stream.

pub mod question;
pub mod recall;
pub mod subtask;

pub use question::{QuestionError, QuestionProtocol};
pub use recall::{RecallHandler, RecallOutcome, RecallSnapshot};
pub use subtask::SubtaskTracker;
