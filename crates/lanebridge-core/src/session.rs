//! Session lifecycle state (spec §3 "SessionState", "ProcessingTask").

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session_key::SessionKey;

/// Lifecycle status of a [`SessionState`] (spec §4.7 per-session state
/// machine: `idle -> processing -> {idle, error, aborted} -> idle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Processing,
    Error,
}

/// One gateway-side session: the mapping from a canonical [`SessionKey`]
/// to a backend agent session id, plus bookkeeping the Session Manager
/// needs. Exactly one `SessionState` exists per canonical key (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub key: SessionKey,
    pub agent_session_id: String,
    pub agent_id: String,
    pub status: SessionStatus,
    pub project_path: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub message_count: u64,
    pub metadata: HashMap<String, Value>,
    /// Set by the Question Protocol (spec §4.6 step 4): the *next*
    /// part-update for this session must allocate a fresh streamer
    /// instead of appending to the one active when the question fired.
    #[serde(default)]
    pub needs_new_card: bool,
}

impl SessionState {
    pub fn new(
        key: SessionKey,
        agent_session_id: impl Into<String>,
        agent_id: impl Into<String>,
        project_path: impl Into<String>,
        model: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            key,
            agent_session_id: agent_session_id.into(),
            agent_id: agent_id.into(),
            status: SessionStatus::Active,
            project_path: project_path.into(),
            model,
            created_at: now,
            last_active_at: now,
            message_count: 0,
            metadata: HashMap::new(),
            needs_new_card: false,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }
}

/// At most one per session key (spec §3 "ProcessingTask"); created when
/// the gateway begins processing a message, cleared on completion or
/// abort. `cancel` is observed by any in-flight agent call owned by this
/// task (spec §5 "Cancellation").
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    pub session_key_str: String,
    pub message_id: String,
    pub start_time: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl ProcessingTask {
    pub fn new(session_key_str: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            session_key_str: session_key_str.into(),
            message_id: message_id.into(),
            start_time: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_is_active_with_zero_messages() {
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        let state = SessionState::new(key, "agent-sess-1", "opencode", "/work", None);
        assert_eq!(state.status, SessionStatus::Active);
        assert_eq!(state.message_count, 0);
        assert!(!state.needs_new_card);
    }

    #[test]
    fn touch_advances_last_active_at() {
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        let mut state = SessionState::new(key, "agent-sess-1", "opencode", "/work", None);
        let before = state.last_active_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        state.touch();
        assert!(state.last_active_at > before);
    }

    #[test]
    fn abort_is_observable_through_the_cancellation_token() {
        let task = ProcessingTask::new("feishu:chat:oc_1", "msg-1");
        assert!(!task.is_aborted());
        task.abort();
        assert!(task.is_aborted());
        assert!(task.cancel.is_cancelled());
    }
}
