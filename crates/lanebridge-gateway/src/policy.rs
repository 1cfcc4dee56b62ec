//! Chat policy gate (SPEC_FULL §C.3 "Policy gate ahead of routing").
//!
//! Grounded on the teacher's `PolicyConfig`/`DmPolicy`/`GroupPolicy`
//! (`crate_bot_core/src/policy.rs`): decides *whether* a message is
//! processed at all. The Bindings Router (spec §4.2) still decides
//! *which agent* handles anything that passes this gate; the two stages
//! are independent and run in that order from the Gateway's message
//! handler.

use std::collections::HashSet;

use lanebridge_core::binding::MessageContext;

/// Policy for direct messages (`chat_type == "dm"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmPolicy {
    /// Process DMs from anyone.
    #[default]
    Open,
    /// Only process DMs from allowlisted users.
    Allowlist,
    /// Ignore all DMs.
    Disabled,
}

/// Policy for everything else (group chats, channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupPolicy {
    /// Process every message in the chat.
    #[default]
    Always,
    /// Ignore all messages in non-DM chats.
    Disabled,
}

/// Gate applied immediately before the Bindings Router (spec §4.2).
#[derive(Debug, Clone, Default)]
pub struct ChatPolicy {
    pub dm_policy: DmPolicy,
    pub group_policy: GroupPolicy,
    pub allowlist: HashSet<String>,
    pub blocklist: HashSet<String>,
}

impl ChatPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dm_policy(mut self, policy: DmPolicy) -> Self {
        self.dm_policy = policy;
        self
    }

    pub fn with_group_policy(mut self, policy: GroupPolicy) -> Self {
        self.group_policy = policy;
        self
    }

    pub fn allow_user(mut self, user_id: impl Into<String>) -> Self {
        self.allowlist.insert(user_id.into());
        self
    }

    pub fn block_user(mut self, user_id: impl Into<String>) -> Self {
        self.blocklist.insert(user_id.into());
        self
    }

    pub fn is_blocked(&self, user_id: &str) -> bool {
        self.blocklist.contains(user_id)
    }

    /// Whether `ctx` should be handed to the router at all.
    pub fn should_process(&self, ctx: &MessageContext) -> bool {
        if self.is_blocked(&ctx.user_id) {
            return false;
        }
        if ctx.chat_type == "dm" {
            match self.dm_policy {
                DmPolicy::Open => true,
                DmPolicy::Allowlist => self.allowlist.contains(&ctx.user_id),
                DmPolicy::Disabled => false,
            }
        } else {
            self.group_policy != GroupPolicy::Disabled
        }
    }
}
