//! Shared domain types and capability interfaces for the chat-to-agent gateway.
//!
//! This crate owns nothing that mutates at runtime: it is the vocabulary
//! the other `lanebridge-*` crates share, plus the `Channel` / `Agent` /
//! `McpServer` trait seams that keep platform- and backend-specific code
//! out of the core pipeline.

pub mod binding;
pub mod card;
pub mod error;
pub mod event;
pub mod part;
pub mod question;
pub mod session;
pub mod session_key;
pub mod traits;

pub use binding::{Binding, BindingMatch, MatchField, MessageContext, RouteDecision};
pub use card::{Card, CardElement, CardHeader, CardTemplate};
pub use error::CoreError;
pub use event::{AgentEvent, EventKind, EventRecord};
pub use part::{OrderedPart, PartPayload, SubtaskInfo, ToolCallState};
pub use question::{PendingQuestion, Question, QuestionKind};
pub use session::{ProcessingTask, SessionState, SessionStatus};
pub use session_key::{SessionKey, SessionKeyError};
pub use traits::{
    Agent, AgentEventStream, Channel, CompactResult, McpServer, ModelInfo, SessionDetail,
    SessionDetailSummary, UpdateResult,
};
