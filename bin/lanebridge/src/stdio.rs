//! Built-in terminal channel + agent pair used to smoke-test a wired-up
//! [`lanebridge_gateway::Gateway`] without a real messaging platform or
//! agent backend (both of which spec §1 names as external collaborators
//! with named interfaces only — there's no concrete adapter for either in
//! this workspace). Mirrors how the teacher's bins each own one concrete
//! `Channel`/`Agent` pair for their platform; this is that pair for a
//! local terminal session instead of Telegram/Discord.
//!
//! `StdioChannel` prints cards to stdout as plain text; `EchoAgent` replies
//! to every prompt with a fixed acknowledgement text part followed by
//! `session.idle`, just enough to drive one pass through the Gateway's
//! pipeline end to end.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use lanebridge_core::card::Card;
use lanebridge_core::event::AgentEvent;
use lanebridge_core::traits::{
    Agent, AgentEventStream, Channel, CompactResult, ModelInfo, SessionDetail, SessionDetailSummary, UpdateResult,
};
use serde_json::{json, Value};
use tokio::sync::Mutex;

pub const CHANNEL_ID: &str = "stdio";

/// Prints every card/text send as a framed block on stdout; "updates" and
/// "deletes" are logged as such so a human watching the terminal can see
/// the Card Streamer's sync behavior (spec §4.5 "Card list sync").
pub struct StdioChannel {
    next_message_id: AtomicU64,
    stdout: Mutex<std::io::Stdout>,
}

impl StdioChannel {
    pub fn new() -> Self {
        Self { next_message_id: AtomicU64::new(1), stdout: Mutex::new(std::io::stdout()) }
    }

    fn alloc_id(&self) -> String {
        format!("stdio-msg-{}", self.next_message_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn print(&self, label: &str, body: &str) {
        let mut out = self.stdout.lock().await;
        let _ = writeln!(out, "\n--- {label} ---\n{body}");
        let _ = out.flush();
    }
}

#[async_trait]
impl Channel for StdioChannel {
    fn channel_id(&self) -> &str {
        CHANNEL_ID
    }

    async fn send_text(&self, _chat_id: &str, text: &str) -> anyhow::Result<String> {
        let id = self.alloc_id();
        self.print(&format!("send_text {id}"), text).await;
        Ok(id)
    }

    async fn send_card(&self, _chat_id: &str, card: &Card) -> anyhow::Result<String> {
        let id = self.alloc_id();
        self.print(&format!("send_card {id} [{}]", card.header.title), &serde_json::to_string_pretty(card)?).await;
        Ok(id)
    }

    async fn update_card(&self, message_id: &str, card: &Card) -> anyhow::Result<UpdateResult> {
        self.print(&format!("update_card {message_id} [{}]", card.header.title), &serde_json::to_string_pretty(card)?).await;
        Ok(UpdateResult::ok())
    }

    async fn delete_message(&self, message_id: &str) -> anyhow::Result<()> {
        self.print("delete_message", message_id).await;
        Ok(())
    }

    async fn create_chat(&self, name: &str, _user_ids: &[String]) -> anyhow::Result<String> {
        Ok(format!("stdio-chat-{name}"))
    }

    async fn update_chat_name(&self, _chat_id: &str, _name: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn delete_chat(&self, _chat_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// An `Agent` that never calls out to a real backend: `send_prompt`
/// immediately queues a canned reply + `session.idle` for the next
/// `subscribe_events` call to drain. Useful only for exercising the
/// Gateway/Streamer wiring interactively; a real deployment registers a
/// backend-specific `Agent` instead.
pub struct EchoAgent {
    id: String,
    next_session: AtomicU64,
}

impl EchoAgent {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), next_session: AtomicU64::new(1) }
    }
}

#[async_trait]
impl Agent for EchoAgent {
    fn agent_id(&self) -> &str {
        &self.id
    }

    async fn create_session(&self, _dir: &str) -> anyhow::Result<String> {
        let n = self.next_session.fetch_add(1, Ordering::SeqCst);
        Ok(format!("stdio-session-{n}"))
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
        Ok(vec![ModelInfo { id: "echo".to_string(), name: "Echo debug model".to_string(), provider_id: "stdio".to_string() }])
    }

    async fn get_session_detail(&self, _session_id: &str) -> anyhow::Result<SessionDetail> {
        Ok(SessionDetail { title: "stdio session".to_string(), summary: SessionDetailSummary::default() })
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

    async fn subscribe_events(&self, session_id: &str) -> anyhow::Result<AgentEventStream> {
        let echo = AgentEvent {
            event_id: format!("{session_id}-echo"),
            kind_raw: "message.part.updated".to_string(),
            properties: json!({
                "sessionID": session_id,
                "part": { "id": "p-echo", "type": "text", "text": "hi from the stdio debug agent" },
            }),
        };
        let idle = AgentEvent {
            event_id: format!("{session_id}-idle"),
            kind_raw: "session.idle".to_string(),
            properties: json!({ "sessionID": session_id }),
        };
        Ok(Box::pin(stream::iter(vec![echo, idle])))
    }
}

pub fn build_agent(id: impl Into<String>) -> Arc<dyn Agent> {
    Arc::new(EchoAgent::new(id))
}

pub fn build_channel() -> Arc<dyn Channel> {
    Arc::new(StdioChannel::new())
}
