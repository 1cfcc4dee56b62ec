//! Session Manager (spec §4.3 "C3 Session Manager").
//!
//! Grounded on the teacher's `SessionManager` (`get_or_create_session`,
//! `remove_session`, `get_active_session_count`) generalized from a single
//! `sessionId -> SessionState` map keyed by a free-form string into the
//! structured `SessionKey` model, plus the extra state maps (`groups`,
//! `events`, `tasks`, `subtasks`) and sweeper this spec's component needs
//! that the teacher's manager does not.

mod sweeper;

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use lanebridge_core::{CompactResult, CoreError, ProcessingTask, SessionKey, SessionState, SessionStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use sweeper::{Sweeper, SweeperConfig};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("agent backend call failed: {0}")]
    Agent(#[from] anyhow::Error),
    #[error("no session exists for key {0}")]
    NotFound(String),
}

/// Ambient metadata about a chat (group/channel), kept alongside sessions
/// so the Gateway can answer "who's in this chat" without a platform
/// round trip (SPEC_FULL §F "groups map").
#[derive(Debug, Clone, Default)]
pub struct SessionGroupInfo {
    pub chat_id: String,
    pub member_ids: HashSet<String>,
    pub title: Option<String>,
}

/// State kept by the Session Manager (spec §4.3 "State").
pub struct SessionManager {
    sessions: Arc<DashMap<String, SessionState>>,
    groups: Arc<DashMap<String, SessionGroupInfo>>,
    events: Arc<DashMap<String, i64>>,
    tasks: Arc<DashMap<String, ProcessingTask>>,
    subtasks: Arc<DashMap<String, HashSet<String>>>,
    dedupe_window_ms: i64,
    /// Every `Agent` handle this manager may need to call back into,
    /// keyed by `agent_id()` (spec §9 "registration keyed by string id").
    /// A session's calls always resolve through `session.agent_id` here
    /// rather than through a single fixed handle, so a session that has
    /// been moved onto a different agent via [`Self::switch_agent`] still
    /// gets aborted/compacted/model-switched against the right backend.
    agents: Arc<DashMap<String, Arc<dyn lanebridge_core::Agent>>>,
    default_agent_id: String,
}

impl SessionManager {
    pub fn new(default_agent: Arc<dyn lanebridge_core::Agent>, dedupe_window_ms: i64) -> Self {
        let default_agent_id = default_agent.agent_id().to_string();
        let agents = Arc::new(DashMap::new());
        agents.insert(default_agent_id.clone(), default_agent);
        Self {
            sessions: Arc::new(DashMap::new()),
            groups: Arc::new(DashMap::new()),
            events: Arc::new(DashMap::new()),
            tasks: Arc::new(DashMap::new()),
            subtasks: Arc::new(DashMap::new()),
            dedupe_window_ms,
            agents,
            default_agent_id,
        }
    }

    /// Register (or replace) an `Agent` handle this manager may resolve
    /// calls against. The Gateway calls this whenever it registers an
    /// agent on itself, keeping the two registries in sync.
    pub fn register_agent(&self, agent: Arc<dyn lanebridge_core::Agent>) {
        self.agents.insert(agent.agent_id().to_string(), agent);
    }

    fn resolve_agent(&self, agent_id: &str) -> Result<Arc<dyn lanebridge_core::Agent>, SessionError> {
        self.agents
            .get(agent_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| SessionError::Core(CoreError::AgentNotFound(agent_id.to_string())))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn get(&self, key: &SessionKey) -> Option<SessionState> {
        self.sessions.get(&key.to_string()).map(|entry| entry.clone())
    }

    /// Reinstate a session loaded from the persisted-state file
    /// (SPEC_FULL §F) without calling back into the agent backend. Used
    /// only at startup, before any traffic is being routed; a session
    /// already present for `state`'s key is left untouched.
    pub fn restore_session(&self, state: SessionState) {
        self.sessions.entry(state.key.to_string()).or_insert(state);
    }

    /// All sessions currently held, for writing out the persisted-state
    /// file (SPEC_FULL §F) on a clean shutdown.
    pub fn snapshot_sessions(&self) -> Vec<SessionState> {
        self.sessions.iter().map(|entry| entry.clone()).collect()
    }

    /// Reinstate a chat's group info loaded from the persisted-state file.
    pub fn restore_group(&self, info: SessionGroupInfo) {
        self.groups.entry(info.chat_id.clone()).or_insert(info);
    }

    /// All group info currently held, for the persisted-state file.
    pub fn snapshot_groups(&self) -> Vec<SessionGroupInfo> {
        self.groups.iter().map(|entry| entry.clone()).collect()
    }

    /// `getOrCreateSession(key, projectPath, model?)` (spec §4.3). If a
    /// session already exists for `key`, its `lastActiveAt` is refreshed
    /// and it's returned as-is; otherwise a new backend session is
    /// created and stored.
    pub async fn get_or_create_session(
        &self,
        key: &SessionKey,
        project_path: &str,
        model: Option<&str>,
    ) -> Result<SessionState, SessionError> {
        let key_str = key.to_string();

        if let Some(mut existing) = self.sessions.get_mut(&key_str) {
            existing.touch();
            return Ok(existing.clone());
        }

        let agent = self.resolve_agent(&self.default_agent_id)?;
        let agent_session_id = agent.create_session(project_path).await?;
        let state = SessionState::new(
            key.clone(),
            agent_session_id,
            agent.agent_id().to_string(),
            project_path.to_string(),
            model.map(str::to_string),
        );

        self.sessions.insert(key_str, state.clone());
        debug!(key = %key, agent_id = %state.agent_id, "session created");
        Ok(state)
    }

    /// `updateSession` (spec §4.3): mutate in place, refreshing
    /// `lastActiveAt`.
    pub fn update_session(&self, key: &SessionKey, mutate: impl FnOnce(&mut SessionState)) -> Result<(), SessionError> {
        let mut entry = self
            .sessions
            .get_mut(&key.to_string())
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        mutate(&mut entry);
        entry.touch();
        Ok(())
    }

    /// `deleteSession` (spec §4.3).
    pub fn delete_session(&self, key: &SessionKey) {
        self.sessions.remove(&key.to_string());
        self.subtasks.remove(&key.to_string());
    }

    /// `switchModel(key, model)` (spec §4.3): agent call followed by a
    /// local mutation. If the agent call succeeds but the local mutation
    /// is never reached (process crash), the session is left dirty —
    /// that is the spec's accepted "best-effort" rollback story.
    pub async fn switch_model(&self, key: &SessionKey, model: &str) -> Result<(), SessionError> {
        let session = self
            .get(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        let agent = self.resolve_agent(&session.agent_id)?;
        agent
            .send_prompt(&session.agent_session_id, Vec::new(), Some(model))
            .await?;
        self.update_session(key, |s| s.model = Some(model.to_string()))
    }

    /// `switchProject(key, path)` (spec §4.3): destroy and recreate the
    /// session, preserving the model.
    pub async fn switch_project(&self, key: &SessionKey, path: &str) -> Result<SessionState, SessionError> {
        let model = self.get(key).and_then(|s| s.model.clone());
        self.delete_session(key);
        self.get_or_create_session(key, path, model.as_deref()).await
    }

    /// `switchAgent(key, agentId)` (spec §4.3): create a new backend
    /// session on `agentId` and replace `agentSessionId`/`agentId`.
    ///
    /// The manager holds one `Agent` handle; callers routing across
    /// multiple backends supply the already-resolved agent here rather
    /// than the manager looking one up by id, matching the Gateway's
    /// registration-by-string-id model (spec §9).
    pub async fn switch_agent(
        &self,
        key: &SessionKey,
        new_agent: Arc<dyn lanebridge_core::Agent>,
    ) -> Result<(), SessionError> {
        let project_path = self
            .get(key)
            .map(|s| s.project_path.clone())
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        let new_agent_session_id = new_agent.create_session(&project_path).await?;
        self.register_agent(new_agent.clone());
        self.update_session(key, |s| {
            s.agent_session_id = new_agent_session_id;
            s.agent_id = new_agent.agent_id().to_string();
        })
    }

    /// `compact(key)` (spec §4.3): delegate to the agent's `summarize`.
    pub async fn compact(&self, key: &SessionKey, model: Option<&str>) -> Result<CompactResult, SessionError> {
        let session = self
            .get(key)
            .ok_or_else(|| SessionError::NotFound(key.to_string()))?;
        let agent = self.resolve_agent(&session.agent_id)?;
        Ok(agent.summarize(&session.agent_session_id, model).await?)
    }

    /// `isDuplicateEvent(eventId)` (spec §4.3, property P3): within the
    /// dedup window the first mark wins; later emits for the same id are
    /// reported as duplicates.
    pub fn is_duplicate_event(&self, event_id: &str) -> bool {
        match self.events.get(event_id) {
            Some(seen_at) => Utc::now().timestamp_millis() - *seen_at < self.dedupe_window_ms,
            None => false,
        }
    }

    /// `markEventProcessed(eventId)`.
    pub fn mark_event_processed(&self, event_id: &str) {
        self.events
            .entry(event_id.to_string())
            .or_insert_with(|| Utc::now().timestamp_millis());
    }

    /// `startTask(key, messageId) -> cancel` (spec §4.3).
    pub fn start_task(&self, key: &SessionKey, message_id: &str) -> CancellationToken {
        let task = ProcessingTask::new(key.to_string(), message_id.to_string());
        let cancel = task.cancel.clone();
        self.tasks.insert(key.to_string(), task);
        if let Some(mut session) = self.sessions.get_mut(&key.to_string()) {
            session.status = SessionStatus::Processing;
        }
        cancel
    }

    /// `completeTask(key)`: increments `messageCount`.
    pub fn complete_task(&self, key: &SessionKey) {
        self.tasks.remove(&key.to_string());
        if let Some(mut session) = self.sessions.get_mut(&key.to_string()) {
            session.message_count += 1;
            session.status = SessionStatus::Active;
            session.touch();
        }
    }

    /// `abortTask(key)`: invokes `cancel` and clears the task. Returns
    /// whether a task was actually pending for this key so callers (e.g.
    /// the Recall Handler's `{aborted, ...}` result, spec §4.9) can tell
    /// "a running task was cancelled" apart from "the session existed but
    /// had nothing in flight".
    pub async fn abort_task(&self, key: &SessionKey) -> Result<bool, SessionError> {
        let had_task = if let Some((_, task)) = self.tasks.remove(&key.to_string()) {
            task.abort();
            true
        } else {
            false
        };
        if had_task {
            if let Some(session) = self.get(key) {
                let agent = self.resolve_agent(&session.agent_id)?;
                agent.abort(&session.agent_session_id).await?;
            }
            if let Some(mut session) = self.sessions.get_mut(&key.to_string()) {
                session.status = SessionStatus::Idle;
            }
        }
        Ok(had_task)
    }

    pub fn register_group(&self, info: SessionGroupInfo) {
        self.groups.insert(info.chat_id.clone(), info);
    }

    pub fn group(&self, chat_id: &str) -> Option<SessionGroupInfo> {
        self.groups.get(chat_id).map(|entry| entry.clone())
    }

    pub fn attach_subtask(&self, parent_key: &SessionKey, subtask_id: &str) {
        self.subtasks
            .entry(parent_key.to_string())
            .or_default()
            .insert(subtask_id.to_string());
    }

    pub fn known_subtasks(&self, parent_key: &SessionKey) -> HashSet<String> {
        self.subtasks
            .get(&parent_key.to_string())
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// One sweep pass (spec §4.3 "Sweeper"): evict stale event records and
    /// idle out sessions past `idle_timeout_ms` that aren't processing.
    /// Exposed directly so [`Sweeper`] (and tests) can drive it without
    /// waiting on the periodic timer.
    pub fn sweep_once(&self, idle_timeout_ms: i64) {
        let now = Utc::now().timestamp_millis();

        self.events.retain(|_, seen_at| now - *seen_at < self.dedupe_window_ms);

        for mut entry in self.sessions.iter_mut() {
            if entry.status == SessionStatus::Processing {
                continue;
            }
            if now - entry.last_active_at.timestamp_millis() > idle_timeout_ms {
                if entry.status != SessionStatus::Idle {
                    debug!(key = %entry.key, "marking session idle");
                }
                entry.status = SessionStatus::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanebridge_core::{Agent, AgentEventStream, CompactResult, ModelInfo, SessionDetail, SessionDetailSummary};
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubAgent {
        id: String,
        sessions_created: AtomicUsize,
        aborts_received: AtomicUsize,
    }

    impl StubAgent {
        fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                sessions_created: AtomicUsize::new(0),
                aborts_received: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> &str {
            &self.id
        }

        async fn create_session(&self, _dir: &str) -> anyhow::Result<String> {
            let n = self.sessions_created.fetch_add(1, Ordering::SeqCst);
            Ok(format!("backend-session-{n}"))
        }

        async fn send_prompt(&self, _session_id: &str, _parts: Vec<Value>, _model: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn abort(&self, _session_id: &str) -> anyhow::Result<()> {
            self.aborts_received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute_command(&self, _session_id: &str, _cmd: &str, _args: &[String]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }

        async fn execute_shell(&self, _session_id: &str, _cmd: &str, _model: Option<&str>) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }

        async fn summarize(&self, _session_id: &str, _model: Option<&str>) -> anyhow::Result<CompactResult> {
            Ok(CompactResult {
                success: true,
                before_tokens: Some(1000),
                after_tokens: Some(200),
                error: None,
            })
        }

        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }

        async fn get_session_detail(&self, _session_id: &str) -> anyhow::Result<SessionDetail> {
            Ok(SessionDetail {
                title: "stub".into(),
                summary: SessionDetailSummary::default(),
            })
        }

        async fn get_child_sessions(&self, _parent_id: &str) -> anyhow::Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn reply_question(&self, _request_id: &str, _answers: Vec<Vec<String>>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn reject_question(&self, _request_id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn subscribe_events(&self, _session_id: &str) -> anyhow::Result<AgentEventStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(StubAgent::new("opencode")), 5_000)
    }

    #[tokio::test]
    async fn creates_a_session_once_and_reuses_it() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();

        let first = mgr.get_or_create_session(&key, "/proj", None).await.unwrap();
        let second = mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        assert_eq!(first.agent_session_id, second.agent_session_id);
        assert_eq!(mgr.session_count(), 1);
    }

    #[tokio::test]
    async fn delete_then_recreate_assigns_a_fresh_backend_session() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();

        let first = mgr.get_or_create_session(&key, "/proj", None).await.unwrap();
        mgr.delete_session(&key);
        let second = mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        assert_ne!(first.agent_session_id, second.agent_session_id);
    }

    #[tokio::test]
    async fn switch_project_preserves_model_but_gets_a_new_backend_session() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        let original = mgr.get_or_create_session(&key, "/proj", Some("claude-opus")).await.unwrap();

        let switched = mgr.switch_project(&key, "/other-proj").await.unwrap();

        assert_ne!(original.agent_session_id, switched.agent_session_id);
        assert_eq!(switched.model.as_deref(), Some("claude-opus"));
        assert_eq!(switched.project_path, "/other-proj");
    }

    #[tokio::test]
    async fn duplicate_event_within_window_is_reported_and_ignored() {
        let mgr = manager();
        assert!(!mgr.is_duplicate_event("evt-1"));
        mgr.mark_event_processed("evt-1");
        assert!(mgr.is_duplicate_event("evt-1"));
        // A second mark for the same id is a no-op: first mark wins.
        mgr.mark_event_processed("evt-1");
        assert!(mgr.is_duplicate_event("evt-1"));
    }

    #[tokio::test]
    async fn start_task_marks_processing_and_complete_increments_message_count() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        let cancel = mgr.start_task(&key, "msg-1");
        assert_eq!(mgr.get(&key).unwrap().status, SessionStatus::Processing);
        assert!(!cancel.is_cancelled());

        mgr.complete_task(&key);
        let session = mgr.get(&key).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.message_count, 1);
    }

    #[tokio::test]
    async fn abort_task_cancels_the_token_and_returns_session_to_idle() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        let cancel = mgr.start_task(&key, "msg-1");
        let had_task = mgr.abort_task(&key).await.unwrap();

        assert!(had_task);
        assert!(cancel.is_cancelled());
        assert_eq!(mgr.get(&key).unwrap().status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn abort_task_reports_false_when_nothing_is_pending() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        // No `start_task` call: the session exists but has no active task,
        // matching a recall that arrives after the bot already replied.
        let had_task = mgr.abort_task(&key).await.unwrap();

        assert!(!had_task);
    }

    #[tokio::test]
    async fn abort_after_switch_agent_calls_the_new_agent_not_the_original_default() {
        let mgr = manager();
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        mgr.get_or_create_session(&key, "/proj", None).await.unwrap();

        let other = Arc::new(StubAgent::new("claude-backend"));
        mgr.switch_agent(&key, other.clone()).await.unwrap();

        mgr.start_task(&key, "msg-1");
        mgr.abort_task(&key).await.unwrap();

        assert_eq!(other.aborts_received.load(Ordering::SeqCst), 1, "the session's current agent should see the abort");
    }

    #[tokio::test]
    async fn sweep_marks_sessions_idle_past_timeout_but_leaves_processing_ones_alone() {
        let mgr = manager();
        let idle_key = SessionKey::chat("feishu", "oc_idle").unwrap();
        let busy_key = SessionKey::chat("feishu", "oc_busy").unwrap();
        mgr.get_or_create_session(&idle_key, "/proj", None).await.unwrap();
        mgr.get_or_create_session(&busy_key, "/proj", None).await.unwrap();
        mgr.start_task(&busy_key, "msg-1");

        // Force both sessions' lastActiveAt far enough in the past.
        mgr.update_session(&idle_key, |s| s.last_active_at = Utc::now() - chrono::Duration::seconds(120)).unwrap();
        mgr.update_session(&busy_key, |s| s.last_active_at = Utc::now() - chrono::Duration::seconds(120)).unwrap();

        mgr.sweep_once(60_000);

        assert_eq!(mgr.get(&idle_key).unwrap().status, SessionStatus::Idle);
        assert_eq!(mgr.get(&busy_key).unwrap().status, SessionStatus::Processing);
    }
}
