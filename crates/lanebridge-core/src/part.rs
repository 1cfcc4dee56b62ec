//! Rendering-model parts (spec §3 "OrderedPart").

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State of a tool-call part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallState {
    Pending,
    Running,
    Completed,
    Error,
}

/// Sub-task metadata attached to a `delegate_task`/`task` tool-call part
/// once a child session has been attributed to it (spec §4.8).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubtaskInfo {
    pub agent_type: String,
    pub description: String,
    pub tool_count: u32,
    pub current_tool: Option<String>,
    pub summary: Option<SubtaskSummary>,
    pub conclusion: Option<String>,
    pub prompt: Option<String>,
    /// Truncated to 500 chars for display (spec §4.8).
    pub streaming_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtaskSummary {
    pub files: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
}

/// The payload carried by one [`OrderedPart`], tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartPayload {
    Text { text: String },
    Reasoning { text: String },
    ToolCall {
        name: String,
        state: ToolCallState,
        input: Value,
        output: Option<Value>,
        error: Option<String>,
        /// Duration in milliseconds; durations >= 100ms are rendered
        /// (spec §4.4 "Numeric semantics").
        time: Option<u64>,
        subtask: Option<SubtaskInfo>,
    },
}

/// One unit of agent output, identified by a backend-stable `part_id`.
/// The Part Folder maintains a vector of these using append-or-replace-by-id
/// semantics (spec §4.4, property P4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderedPart {
    pub part_id: String,
    pub payload: PartPayload,
}

impl OrderedPart {
    pub fn text(part_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            part_id: part_id.into(),
            payload: PartPayload::Text { text: text.into() },
        }
    }

    pub fn reasoning(part_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            part_id: part_id.into(),
            payload: PartPayload::Reasoning { text: text.into() },
        }
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.payload, PartPayload::ToolCall { .. })
    }

    /// Name of the tool this part calls, if it is a tool-call part.
    pub fn tool_name(&self) -> Option<&str> {
        match &self.payload {
            PartPayload::ToolCall { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn tool_state(&self) -> Option<ToolCallState> {
        match &self.payload {
            PartPayload::ToolCall { state, .. } => Some(*state),
            _ => None,
        }
    }

    pub fn subtask(&self) -> Option<&SubtaskInfo> {
        match &self.payload {
            PartPayload::ToolCall { subtask, .. } => subtask.as_ref(),
            _ => None,
        }
    }

    pub fn subtask_mut(&mut self) -> Option<&mut SubtaskInfo> {
        match &mut self.payload {
            PartPayload::ToolCall { subtask, .. } => subtask.as_mut(),
            _ => None,
        }
    }

    pub fn set_tool_state(&mut self, new_state: ToolCallState) {
        if let PartPayload::ToolCall { state, .. } = &mut self.payload {
            *state = new_state;
        }
    }
}

/// Tool names that trigger sub-task attribution (spec §4.8).
pub const DELEGATION_TOOL_NAMES: &[&str] = &["delegate_task", "task"];

pub fn is_delegation_tool(name: &str) -> bool {
    DELEGATION_TOOL_NAMES.contains(&name)
}
