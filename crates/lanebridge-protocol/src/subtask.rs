//! Sub-task Tracker (spec §4.8 "C8 Sub-task Tracker").
//!
//! Grounded on the teacher's `crate_chat_backend/src/session.rs`
//! child-process attribution map (a `childPid -> parentTaskId` table kept
//! so output from a spawned child process is folded back into its
//! parent's log rather than treated as a new top-level entry). This
//! module generalizes that same "attribute child activity back to its
//! parent" idea from OS child processes to agent child sessions.

use std::sync::Arc;

use dashmap::DashMap;
use lanebridge_core::event::{AgentEvent, EventKind};
use lanebridge_core::part::{SubtaskInfo, SubtaskSummary, ToolCallState};
use lanebridge_core::traits::{Agent, SessionDetail};
use lanebridge_streamer::fold::PartFolder;
use tracing::{debug, warn};

/// One parent's attribution state: which part reserved the attribution
/// slot, and which child session ids have been mapped onto it.
#[derive(Debug, Clone, Default)]
struct Attribution {
    part_id: String,
    background: bool,
    child_seen: bool,
}

/// Tracks `childSessionId -> partId` attribution for one parent session's
/// rendering (spec §3 "Ownership: ... Session Manager holds only the
/// child-session-id -> parent-part-id mapping for attribution"; kept here
/// rather than in the Session Manager since it is folded directly against
/// a [`PartFolder`], not against session state).
#[derive(Default)]
pub struct SubtaskTracker {
    /// `childSessionId -> Attribution`.
    children: DashMap<String, Attribution>,
}

impl SubtaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `part_id` as an attribution target for the next child
    /// session to appear (spec §4.8: "When a tool-call part named
    /// `delegate_task` or `task` enters `running` state, reserve its
    /// `partId` as the attribution target"). `background` records
    /// whether `input.run_in_background` was set, for the pending-display
    /// override below.
    pub fn reserve(&self, part_id: &str, background: bool) {
        // Reservations are keyed by a placeholder until a child session id
        // shows up in `session.created`; store under the part id itself so
        // `attribute_child` can find the most recently reserved, unclaimed
        // slot for this part.
        self.children.insert(
            format!("__reserved__{part_id}"),
            Attribution { part_id: part_id.to_string(), background, child_seen: false },
        );
    }

    /// `session.created` whose `parentID` matches the current session:
    /// claim the reservation for `parent_part_id` (found via
    /// `PartFolder::nearest_running_delegation`) and map `child_session_id`
    /// onto it.
    pub fn attribute_child(&self, child_session_id: &str, parent_part_id: &str, background: bool) {
        self.children.remove(&format!("__reserved__{parent_part_id}"));
        self.children.insert(
            child_session_id.to_string(),
            Attribution { part_id: parent_part_id.to_string(), background, child_seen: true },
        );
        debug!(child_session_id, parent_part_id, "attributed child session to parent tool-call");
    }

    /// The `background` flag recorded by [`Self::reserve`] for a still-open
    /// reservation, so a caller attributing a freshly-seen child session
    /// doesn't have to re-derive `input.run_in_background` from the
    /// original tool-call part.
    pub fn reserved_background(&self, part_id: &str) -> bool {
        self.children.get(&format!("__reserved__{part_id}")).map(|a| a.background).unwrap_or(false)
    }

    pub fn is_known_child(&self, session_id: &str) -> bool {
        self.children.contains_key(session_id)
    }

    pub fn parent_part_for(&self, child_session_id: &str) -> Option<String> {
        self.children.get(child_session_id).map(|a| a.part_id.clone())
    }

    pub fn is_background(&self, child_session_id: &str) -> bool {
        self.children.get(child_session_id).map(|a| a.background).unwrap_or(false)
    }

    pub fn has_any_child_for(&self, part_id: &str) -> bool {
        self.children.iter().any(|e| e.part_id == part_id && e.child_seen)
    }

    pub fn forget_parent(&self, part_id: &str) {
        self.children.remove(&format!("__reserved__{part_id}"));
        self.children.retain(|_, a| a.part_id != part_id);
    }

    /// Apply one child-session event onto the parent's folded parts (spec
    /// §4.8 bullet list). Returns `true` if `folder` was mutated (caller
    /// should schedule a re-render), mirroring
    /// [`lanebridge_streamer::fold::PartFolder::fold_event`]'s contract.
    ///
    /// `event` must already be known to belong to a tracked child session
    /// (checked via [`Self::is_known_child`] by the caller before
    /// fetching `get_session_detail`, since that call only matters on
    /// `session.idle`).
    pub fn apply_child_event(&self, folder: &mut PartFolder, child_session_id: &str, event: &AgentEvent) -> bool {
        let Some(part_id) = self.parent_part_for(child_session_id) else {
            warn!(child_session_id, "apply_child_event called for an unattributed child session");
            return false;
        };

        match event.kind() {
            EventKind::MessagePartUpdated => {
                let Some(part) = event.properties.get("part") else { return false };
                match part.get("type").and_then(|v| v.as_str()) {
                    Some("tool-call") => {
                        let completed = part.get("state").and_then(|v| v.as_str()) == Some("completed");
                        let running = part.get("state").and_then(|v| v.as_str()) == Some("running");
                        let name = part.get("name").and_then(|v| v.as_str()).map(str::to_string);
                        folder
                            .with_subtask_mut(&part_id, |info| {
                                if completed {
                                    info.tool_count += 1;
                                    info.current_tool = None;
                                } else if running {
                                    info.current_tool = name;
                                }
                            })
                            .is_some()
                    }
                    Some("text") => {
                        let text = part.get("text").and_then(|v| v.as_str()).unwrap_or_default();
                        folder
                            .with_subtask_mut(&part_id, |info| {
                                let mut buf = info.streaming_text.take().unwrap_or_default();
                                buf.push_str(text);
                                if buf.len() > 500 {
                                    let cut = buf.char_indices().nth(500).map(|(i, _)| i).unwrap_or(buf.len());
                                    buf.truncate(cut);
                                }
                                info.streaming_text = Some(buf);
                            })
                            .is_some()
                    }
                    _ => false,
                }
            }
            EventKind::SessionIdle => {
                // Caller is responsible for the async `get_session_detail`
                // fetch and passing the result to `finish_with_detail`;
                // `apply_child_event` alone can't make that RPC.
                false
            }
            _ => false,
        }
    }

    /// `session.idle` on a child (spec §4.8): write fetched detail into
    /// `subtask.summary`/`subtask.conclusion` and transition the parent
    /// tool-call to `completed` — unless it's a still-pending background
    /// delegation (see [`Self::adjust_completion_state`]).
    pub fn finish_with_detail(&self, folder: &mut PartFolder, child_session_id: &str, detail: &SessionDetail) -> bool {
        let Some(part_id) = self.parent_part_for(child_session_id) else {
            return false;
        };
        let updated = folder
            .with_subtask_mut(&part_id, |info| {
                info.conclusion = Some(detail.title.clone());
                info.summary = Some(SubtaskSummary {
                    files: detail.summary.files.clone(),
                    additions: detail.summary.additions,
                    deletions: detail.summary.deletions,
                });
            })
            .is_some();
        folder.set_tool_state(&part_id, ToolCallState::Completed);
        updated
    }

    /// Background-delegation display override (spec §4.8 "Background
    /// delegations"): if `input.run_in_background` was set and the
    /// tool-call reports `completed` before any child session event has
    /// arrived yet, the caller should display it as `pending` (still
    /// running in the background) instead of `completed`.
    pub fn adjust_completion_state(&self, part_id: &str, reported_state: ToolCallState) -> ToolCallState {
        if reported_state != ToolCallState::Completed {
            return reported_state;
        }
        if self.has_any_child_for(part_id) {
            return reported_state;
        }
        let backgrounded = self
            .children
            .get(&format!("__reserved__{part_id}"))
            .map(|a| a.background)
            .unwrap_or(false);
        if backgrounded {
            ToolCallState::Pending
        } else {
            reported_state
        }
    }

    /// Fetch and apply child detail in one step; convenience wrapper for
    /// callers that already hold an `Agent` handle (the Gateway's event
    /// loop).
    pub async fn handle_child_idle(
        &self,
        folder: &mut PartFolder,
        agent: &dyn Agent,
        child_session_id: &str,
    ) -> anyhow::Result<bool> {
        let detail = agent.get_session_detail(child_session_id).await?;
        Ok(self.finish_with_detail(folder, child_session_id, &detail))
    }
}

#[allow(dead_code)]
pub type SharedSubtaskTracker = Arc<SubtaskTracker>;
