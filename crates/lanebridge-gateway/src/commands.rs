//! Command dispatch seam (SPEC_FULL §C.3 "Command parsing stub surface").
//!
//! `spec.md` names slash-style commands (`/help`, `/model`, ...) as an
//! out-of-scope collaborator; this module gives the Gateway's message
//! handler a real extension point for them, grounded on the teacher's
//! `commands.rs` / `handle_command` dispatch, without implementing any
//! concrete command.

use async_trait::async_trait;
use lanebridge_core::binding::MessageContext;

/// Outcome of a dispatched command.
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    /// The command was handled; nothing else should process this message.
    Handled,
    /// Not a command this dispatcher recognizes; fall through to the
    /// normal routing/prompt pipeline.
    NotACommand,
}

/// Implemented by applications that want `/command` messages intercepted
/// before they reach the Bindings Router. The Gateway calls this first
/// in its message handler and only proceeds to routing on
/// [`CommandOutcome::NotACommand`].
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, ctx: &MessageContext) -> anyhow::Result<CommandOutcome>;
}

/// Dispatcher that never recognizes a command; the Gateway's default
/// when no application-specific dispatcher is registered.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCommandDispatcher;

#[async_trait]
impl CommandDispatcher for NoopCommandDispatcher {
    async fn dispatch(&self, _ctx: &MessageContext) -> anyhow::Result<CommandOutcome> {
        Ok(CommandOutcome::NotACommand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_dispatcher_never_claims_a_message() {
        let dispatcher = NoopCommandDispatcher;
        let ctx = MessageContext {
            channel_id: "feishu".into(),
            channel_type: "feishu".into(),
            chat_type: "dm".into(),
            chat_id: "c1".into(),
            user_id: "u1".into(),
            message_text: "/help".into(),
        };
        let outcome = dispatcher.dispatch(&ctx).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::NotACommand));
    }
}
