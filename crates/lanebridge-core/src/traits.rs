//! Capability interfaces (spec §9 "Dynamic dispatch... modeled as a closed
//! set of capability interfaces `{Channel, Agent, McpServer}`").
//!
//! These are the external collaborators named throughout spec §1/§6: the
//! messaging platform client, the agent backend's RPC surface, and MCP
//! tool servers. This crate defines the interfaces only; concrete
//! platform/backend adapters are out of scope (Non-goals, §1) and live
//! outside this workspace (or as test doubles — see
//! `lanebridge-gateway`'s `MockChannel`/`MockAgent`).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::card::Card;

/// Result of an `updateCard` (or similar) call (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub success: bool,
    pub rate_limited: bool,
}

impl UpdateResult {
    pub fn ok() -> Self {
        Self { success: true, rate_limited: false }
    }

    pub fn rate_limited() -> Self {
        Self { success: false, rate_limited: true }
    }

    pub fn failed() -> Self {
        Self { success: false, rate_limited: false }
    }
}

/// Outbound capability toward the messaging platform (spec §6 "Outbound
/// to messaging platform"). Registration is keyed by a string channel id
/// (spec §9 "registration keyed by string id; lookup returns an optional
/// handle. No global singletons.").
#[async_trait]
pub trait Channel: Send + Sync {
    fn channel_id(&self) -> &str;

    async fn send_text(&self, chat_id: &str, text: &str) -> anyhow::Result<String>;
    async fn send_card(&self, chat_id: &str, card: &Card) -> anyhow::Result<String>;
    async fn update_card(&self, message_id: &str, card: &Card) -> anyhow::Result<UpdateResult>;
    async fn delete_message(&self, message_id: &str) -> anyhow::Result<()>;
    async fn create_chat(&self, name: &str, user_ids: &[String]) -> anyhow::Result<String>;
    async fn update_chat_name(&self, chat_id: &str, name: &str) -> anyhow::Result<()>;
    async fn delete_chat(&self, chat_id: &str) -> anyhow::Result<()>;

    /// Ambient UX addition (SPEC_FULL §C.4): best-effort typing
    /// indicator while a [`crate::session::ProcessingTask`] is in flight.
    /// Default no-op so minimal channel adapters don't need to implement it.
    async fn send_typing(&self, _chat_id: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub provider_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionDetailSummary {
    pub files: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    pub title: String,
    pub summary: SessionDetailSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactResult {
    pub success: bool,
    pub before_tokens: Option<u64>,
    pub after_tokens: Option<u64>,
    pub error: Option<String>,
}

pub type AgentEventStream = Pin<Box<dyn Stream<Item = crate::event::AgentEvent> + Send>>;

/// The agent backend's RPC surface (spec §6 "Agent backend").
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> &str;

    async fn create_session(&self, dir: &str) -> anyhow::Result<String>;
    async fn send_prompt(
        &self,
        session_id: &str,
        parts: Vec<Value>,
        model: Option<&str>,
    ) -> anyhow::Result<()>;
    async fn abort(&self, session_id: &str) -> anyhow::Result<()>;
    async fn execute_command(
        &self,
        session_id: &str,
        cmd: &str,
        args: &[String],
    ) -> anyhow::Result<Value>;
    async fn execute_shell(
        &self,
        session_id: &str,
        cmd: &str,
        model: Option<&str>,
    ) -> anyhow::Result<Value>;
    async fn summarize(&self, session_id: &str, model: Option<&str>) -> anyhow::Result<CompactResult>;
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
    async fn get_session_detail(&self, session_id: &str) -> anyhow::Result<SessionDetail>;
    async fn get_child_sessions(&self, parent_id: &str) -> anyhow::Result<Vec<String>>;
    async fn reply_question(
        &self,
        request_id: &str,
        answers: Vec<Vec<String>>,
    ) -> anyhow::Result<()>;
    async fn reject_question(&self, request_id: &str) -> anyhow::Result<()>;
    async fn subscribe_events(&self, session_id: &str) -> anyhow::Result<AgentEventStream>;
}

/// MCP tool servers (document/spreadsheet tools, spec §1): named
/// interface only, no concrete implementation in scope.
#[async_trait]
pub trait McpServer: Send + Sync {
    fn server_id(&self) -> &str;
    async fn call_tool(&self, tool_name: &str, args: Value) -> anyhow::Result<Value>;
}
