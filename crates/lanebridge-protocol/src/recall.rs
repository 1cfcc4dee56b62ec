//! Recall Handler (spec §4.9 "C9 Recall Handler").
//!
//! Grounded on the teacher's `crate_bot_core/src/handler.rs` message
//! cleanup path (tracks which bot messages belong to which inbound user
//! message so an edited/deleted source message can be followed by
//! deleting the bot's replies). This module generalizes single-reply
//! cleanup to the spec's "delete every bot reply sent at or after the
//! recalled message" rule, which needs per-message timestamps the
//! persisted schema alone doesn't carry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lanebridge_core::session_key::SessionKey;
use lanebridge_core::traits::Channel;
use lanebridge_session::SessionManager;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One tracked inbound user message (spec §4.9: `userMessageId ->
/// {chatId, botMessageIds[]}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMessageRecord {
    pub chat_id: String,
    pub timestamp: DateTime<Utc>,
    pub bot_message_ids: Vec<String>,
}

/// One bot-sent message, tracked with its own timestamp so recall can
/// filter by "sent at or after the recalled message" rather than
/// deleting only the replies directly attached to that one user message.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BotMessageRecord {
    message_id: String,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct RecallOutcome {
    pub aborted: bool,
    pub bot_messages_deleted: usize,
}

/// Persisted shape matching spec §4.9's literal schema, used for the
/// on-disk snapshot; the live tracker keeps the richer per-message
/// timestamp index in [`RecallHandler`] itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecallSnapshot {
    pub user_messages: Vec<(String, UserMessageRecord)>,
}

/// Tracks the user-message → bot-replies mapping needed to react to a
/// `message.recalled` event (spec §4.9, property: recall deletes every
/// bot message in the same chat with `timestamp >= recalled.timestamp`
/// and aborts any active task on that chat's session).
#[derive(Default)]
pub struct RecallHandler {
    user_messages: DashMap<String, UserMessageRecord>,
    /// `chatId -> bot messages sent in that chat`, kept sorted by arrival
    /// order (append-only; timestamps are non-decreasing in practice).
    bot_messages: DashMap<String, Vec<BotMessageRecord>>,
}

impl RecallHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_user_message(&self, user_message_id: &str, chat_id: &str) {
        self.user_messages.insert(
            user_message_id.to_string(),
            UserMessageRecord {
                chat_id: chat_id.to_string(),
                timestamp: Utc::now(),
                bot_message_ids: Vec::new(),
            },
        );
    }

    /// Record a bot message sent in reply to `user_message_id` (spec
    /// §4.9). Also indexed by chat for the timestamp-range deletion scan.
    pub fn record_bot_message(&self, user_message_id: &str, chat_id: &str, bot_message_id: &str) {
        let now = Utc::now();
        if let Some(mut record) = self.user_messages.get_mut(user_message_id) {
            record.bot_message_ids.push(bot_message_id.to_string());
        } else {
            warn!(user_message_id, "recording a bot message reply to an untracked user message");
        }
        self.bot_messages
            .entry(chat_id.to_string())
            .or_default()
            .push(BotMessageRecord { message_id: bot_message_id.to_string(), timestamp: now });
    }

    /// `message.recalled` (spec §4.9): delete every bot message sent at or
    /// after the recalled user message's timestamp in the same chat, and
    /// abort any active task on that chat's session.
    pub async fn handle_recall(
        &self,
        user_message_id: &str,
        channel: &dyn Channel,
        sessions: &SessionManager,
        session_key: &SessionKey,
    ) -> RecallOutcome {
        let Some((_, record)) = self.user_messages.remove(user_message_id) else {
            warn!(user_message_id, "recall for an untracked user message; nothing to do");
            return RecallOutcome::default();
        };

        let mut deleted = 0usize;
        if let Some(mut bot_records) = self.bot_messages.get_mut(&record.chat_id) {
            let (to_delete, remaining): (Vec<_>, Vec<_>) =
                bot_records.drain(..).partition(|m| m.timestamp >= record.timestamp);
            *bot_records = remaining;
            drop(bot_records);

            for msg in &to_delete {
                if let Err(err) = channel.delete_message(&msg.message_id).await {
                    warn!(message_id = %msg.message_id, error = %err, "failed to delete recalled-reply message");
                    continue;
                }
                deleted += 1;
            }
        }

        let aborted = sessions.abort_task(session_key).await.unwrap_or(false);

        RecallOutcome { aborted, bot_messages_deleted: deleted }
    }

    /// Drop tracking state for messages older than `before` without
    /// deleting anything — a light-weight eviction so `bot_messages`
    /// doesn't grow unbounded across a long-lived chat.
    pub fn evict_older_than(&self, before: DateTime<Utc>) {
        self.user_messages.retain(|_, record| record.timestamp >= before);
        for mut entry in self.bot_messages.iter_mut() {
            entry.retain(|m| m.timestamp >= before);
        }
    }

    /// Snapshot in the spec's literal persisted shape (§4.9 / §6
    /// "Persisted state"). `bot_messages`' per-message timestamps are not
    /// part of that schema and are not persisted; on restart, recall can
    /// only delete the replies explicitly attached to the recalled
    /// message rather than the full timestamp range (SPEC_FULL §F).
    pub fn snapshot(&self) -> RecallSnapshot {
        RecallSnapshot {
            user_messages: self
                .user_messages
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().clone()))
                .collect(),
        }
    }

    pub fn restore(&self, snapshot: RecallSnapshot) {
        for (user_message_id, record) in snapshot.user_messages {
            for bot_message_id in &record.bot_message_ids {
                self.bot_messages
                    .entry(record.chat_id.clone())
                    .or_default()
                    .push(BotMessageRecord { message_id: bot_message_id.clone(), timestamp: record.timestamp });
            }
            self.user_messages.insert(user_message_id, record);
        }
    }
}

#[allow(dead_code)]
pub type SharedRecallHandler = Arc<RecallHandler>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanebridge_core::card::Card;
    use lanebridge_core::traits::UpdateResult;
    use lanebridge_core::{Agent, AgentEventStream, CompactResult, ModelInfo, SessionDetail, SessionDetailSummary};
    use serde_json::Value;
    use tokio::sync::Mutex;

    struct MockChannel {
        deleted: Mutex<Vec<String>>,
    }

    impl MockChannel {
        fn new() -> Self {
            Self { deleted: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn channel_id(&self) -> &str {
            "mock"
        }
        async fn send_text(&self, _chat_id: &str, _text: &str) -> anyhow::Result<String> {
            Ok("ignored".into())
        }
        async fn send_card(&self, _chat_id: &str, _card: &Card) -> anyhow::Result<String> {
            Ok("msg".into())
        }
        async fn update_card(&self, _message_id: &str, _card: &Card) -> anyhow::Result<UpdateResult> {
            Ok(UpdateResult::ok())
        }
        async fn delete_message(&self, message_id: &str) -> anyhow::Result<()> {
            self.deleted.lock().await.push(message_id.to_string());
            Ok(())
        }
        async fn create_chat(&self, _name: &str, _user_ids: &[String]) -> anyhow::Result<String> {
            Ok("chat".into())
        }
        async fn update_chat_name(&self, _chat_id: &str, _name: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn delete_chat(&self, _chat_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubAgent;

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> &str {
            "stub"
        }
        async fn create_session(&self, _dir: &str) -> anyhow::Result<String> {
            Ok("backend-session".into())
        }
        async fn send_prompt(&self, _session_id: &str, _parts: Vec<Value>, _model: Option<&str>) -> anyhow::Result<()> {
            Ok(())
        }
        async fn abort(&self, _session_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn execute_command(&self, _session_id: &str, _cmd: &str, _args: &[String]) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
        async fn execute_shell(&self, _session_id: &str, _cmd: &str, _model: Option<&str>) -> anyhow::Result<Value> {
            Ok(Value::Null)
        }
        async fn summarize(&self, _session_id: &str, _model: Option<&str>) -> anyhow::Result<CompactResult> {
            Ok(CompactResult { success: true, before_tokens: None, after_tokens: None, error: None })
        }
        async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
            Ok(Vec::new())
        }
        async fn get_session_detail(&self, _session_id: &str) -> anyhow::Result<SessionDetail> {
            Ok(SessionDetail { title: "stub".into(), summary: SessionDetailSummary::default() })
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

    #[tokio::test]
    async fn recall_deletes_replies_at_or_after_recalled_message_and_aborts_task() {
        let handler = RecallHandler::new();
        let channel = MockChannel::new();
        let sessions = SessionManager::new(Arc::new(StubAgent), 5_000);
        let key = SessionKey::chat("telegram", "chat-1").unwrap();
        sessions.get_or_create_session(&key, "/proj", None).await.unwrap();
        sessions.start_task(&key, "user-msg-2");

        handler.record_user_message("user-msg-1", "chat-1");
        handler.record_bot_message("user-msg-1", "chat-1", "bot-msg-1");

        handler.record_user_message("user-msg-2", "chat-1");
        handler.record_bot_message("user-msg-2", "chat-1", "bot-msg-2");
        handler.record_bot_message("user-msg-2", "chat-1", "bot-msg-3");

        let outcome = handler.handle_recall("user-msg-2", &channel, &sessions, &key).await;

        assert!(outcome.aborted);
        assert_eq!(outcome.bot_messages_deleted, 2);
        let deleted = channel.deleted.lock().await;
        assert!(deleted.contains(&"bot-msg-2".to_string()));
        assert!(deleted.contains(&"bot-msg-3".to_string()));
        assert!(!deleted.contains(&"bot-msg-1".to_string()));
    }

    #[tokio::test]
    async fn recall_after_task_already_completed_reports_not_aborted() {
        let handler = RecallHandler::new();
        let channel = MockChannel::new();
        let sessions = SessionManager::new(Arc::new(StubAgent), 5_000);
        let key = SessionKey::chat("telegram", "chat-1").unwrap();
        sessions.get_or_create_session(&key, "/proj", None).await.unwrap();
        // The bot already finished replying before the recall arrives, so
        // there is no pending task left to cancel (spec §4.9).
        sessions.start_task(&key, "user-msg-1");
        sessions.complete_task(&key);

        handler.record_user_message("user-msg-1", "chat-1");
        handler.record_bot_message("user-msg-1", "chat-1", "bot-msg-1");

        let outcome = handler.handle_recall("user-msg-1", &channel, &sessions, &key).await;

        assert!(!outcome.aborted);
        assert_eq!(outcome.bot_messages_deleted, 1);
    }

    #[tokio::test]
    async fn recall_of_untracked_message_is_a_no_op() {
        let handler = RecallHandler::new();
        let channel = MockChannel::new();
        let sessions = SessionManager::new(Arc::new(StubAgent), 5_000);
        let key = SessionKey::chat("telegram", "chat-1").unwrap();

        let outcome = handler.handle_recall("unknown", &channel, &sessions, &key).await;
        assert_eq!(outcome.bot_messages_deleted, 0);
    }

    #[test]
    fn snapshot_round_trips_through_restore() {
        let handler = RecallHandler::new();
        handler.record_user_message("user-msg-1", "chat-1");
        handler.record_bot_message("user-msg-1", "chat-1", "bot-msg-1");

        let snapshot = handler.snapshot();
        let restored = RecallHandler::new();
        restored.restore(snapshot);

        assert!(restored.user_messages.contains_key("user-msg-1"));
        assert_eq!(restored.bot_messages.get("chat-1").unwrap().len(), 1);
    }
}
