//! Part Folder (spec §4.4 "C4 Part Folder").
//!
//! Grounded on the teacher's `format_session_response` / `sync_state`
//! (`crate_bot_core/src/handler.rs`, `crate_chat_backend/src/session.rs`):
//! both fold a backend's event/message history into a flat, orderable
//! view before anything is sent to a chat platform. This module
//! generalizes that single "take latest state" fold into the spec's
//! append-or-replace-by-id semantics over a stream of individually
//! addressable parts.

use lanebridge_core::event::{AgentEvent, EventKind};
use lanebridge_core::part::{is_delegation_tool, OrderedPart, PartPayload, SubtaskInfo, ToolCallState};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FoldError {
    #[error("agent event carried no {0:?} field where a part update was expected")]
    MissingField(&'static str),
    #[error("unknown part type {0:?}")]
    UnknownPartType(String),
}

fn parse_state(raw: Option<&Value>) -> ToolCallState {
    match raw.and_then(Value::as_str) {
        Some("pending") => ToolCallState::Pending,
        Some("running") => ToolCallState::Running,
        Some("completed") => ToolCallState::Completed,
        Some("error") => ToolCallState::Error,
        Some(other) => {
            warn!(state = other, "unknown tool-call state, defaulting to pending");
            ToolCallState::Pending
        }
        None => ToolCallState::Pending,
    }
}

fn parse_part(raw: &Value) -> Result<OrderedPart, FoldError> {
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .ok_or(FoldError::MissingField("id"))?
        .to_string();
    let kind = raw
        .get("type")
        .and_then(Value::as_str)
        .ok_or(FoldError::MissingField("type"))?;

    let payload = match kind {
        "text" => PartPayload::Text {
            text: raw.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        "reasoning" => PartPayload::Reasoning {
            text: raw.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
        },
        "tool-call" | "tool" => PartPayload::ToolCall {
            name: raw.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            state: parse_state(raw.get("state")),
            input: raw.get("input").cloned().unwrap_or(Value::Null),
            output: raw.get("output").cloned(),
            error: raw.get("error").and_then(Value::as_str).map(str::to_string),
            time: raw.get("time").and_then(Value::as_u64),
            subtask: None,
        },
        other => return Err(FoldError::UnknownPartType(other.to_string())),
    };

    Ok(OrderedPart { part_id: id, payload })
}

/// Folds a stream of [`AgentEvent`]s for one parent session into an
/// ordered [`OrderedPart`] list using append-or-replace-by-id semantics
/// (spec §4.4, property P4), applying the first-text-skip policy (spec
/// §4.4, resolved in SPEC_FULL §G: the flag lives on the fold state and
/// is reset only when a new parent session is created).
#[derive(Debug, Default)]
pub struct PartFolder {
    parts: Vec<OrderedPart>,
    first_text_seen: bool,
}

impl PartFolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[OrderedPart] {
        &self.parts
    }

    pub fn into_parts(self) -> Vec<OrderedPart> {
        self.parts
    }

    /// Fold one event. Returns `Ok(true)` if the part list changed (the
    /// caller should schedule a render), `Ok(false)` if the event was a
    /// no-op for folding purposes (not a part update, or dropped by the
    /// first-text-skip policy).
    pub fn fold_event(&mut self, event: &AgentEvent) -> Result<bool, FoldError> {
        if event.kind() != EventKind::MessagePartUpdated {
            return Ok(false);
        }
        let raw = event.properties.get("part").ok_or(FoldError::MissingField("part"))?;
        let part = parse_part(raw)?;

        if matches!(part.payload, PartPayload::Text { .. }) && !self.first_text_seen {
            self.first_text_seen = true;
            debug!(part_id = %part.part_id, "dropping first text part (echoed prompt)");
            return Ok(false);
        }

        self.upsert(part);
        Ok(true)
    }

    /// Append-or-replace-by-id (spec §4.4). A tool-call's locally
    /// attached `subtask` metadata (written by the Sub-task Tracker, C8)
    /// survives a backend-driven replace of the same part id that itself
    /// carries no subtask info — the backend doesn't know about our local
    /// attribution state, so a full overwrite would silently drop it.
    fn upsert(&mut self, mut new_part: OrderedPart) {
        if let Some(pos) = self.parts.iter().position(|p| p.part_id == new_part.part_id) {
            if let (
                PartPayload::ToolCall { subtask: old_subtask, .. },
                PartPayload::ToolCall { subtask: new_subtask, .. },
            ) = (&self.parts[pos].payload, &mut new_part.payload)
            {
                if new_subtask.is_none() {
                    *new_subtask = old_subtask.clone();
                }
            }
            self.parts[pos] = new_part;
        } else {
            self.parts.push(new_part);
        }
    }

    /// The nearest (most recent) in-progress delegation tool-call, used
    /// to reserve an attribution target when a child session appears
    /// (spec §4.8).
    pub fn nearest_running_delegation(&self) -> Option<&str> {
        self.parts
            .iter()
            .rev()
            .find(|p| {
                p.tool_state() == Some(ToolCallState::Running)
                    && p.tool_name().map(is_delegation_tool).unwrap_or(false)
            })
            .map(|p| p.part_id.as_str())
    }

    /// Attach `info` to the tool-call at `part_id`, or create a synthetic
    /// placeholder part if no such tool-call exists yet (spec §4.4
    /// "subtask: attach to the nearest in-progress tool-call ... or
    /// create a synthetic placeholder with id = subtaskInfo.id").
    pub fn ensure_subtask(&mut self, part_id: &str, info: SubtaskInfo) {
        if let Some(existing) = self.parts.iter_mut().find(|p| p.part_id == part_id) {
            if let Some(slot) = existing.subtask_mut() {
                *slot = info;
                return;
            }
        }
        self.parts.push(OrderedPart {
            part_id: part_id.to_string(),
            payload: PartPayload::ToolCall {
                name: "delegate_task".to_string(),
                state: ToolCallState::Running,
                input: Value::Null,
                output: None,
                error: None,
                time: None,
                subtask: Some(info),
            },
        });
    }

    pub fn with_subtask_mut<R>(&mut self, part_id: &str, f: impl FnOnce(&mut SubtaskInfo) -> R) -> Option<R> {
        let part = self.parts.iter_mut().find(|p| p.part_id == part_id)?;
        let slot = part.subtask_mut()?;
        Some(f(slot))
    }

    pub fn set_tool_state(&mut self, part_id: &str, state: ToolCallState) -> bool {
        match self.parts.iter_mut().find(|p| p.part_id == part_id) {
            Some(part) => {
                part.set_tool_state(state);
                true
            }
            None => false,
        }
    }
}
