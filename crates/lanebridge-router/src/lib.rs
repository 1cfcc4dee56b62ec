//! Bindings Router (spec §4.2 "C2 Bindings Router").
//!
//! Grounded on the teacher's policy-gate pattern (`DmPolicy`/`GroupPolicy`
//! matched against an inbound message before it's processed), generalized
//! from a closed two-field policy check into arbitrary priority-ordered,
//! multi-field predicate matching with an explicit default fallback.

use std::collections::HashMap;
use std::sync::Arc;

use lanebridge_core::binding::{Binding, MessageContext, RouteDecision};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("binding {binding_id:?} has an invalid message_pattern regex: {source}")]
    InvalidPattern {
        binding_id: String,
        #[source]
        source: regex::Error,
    },
}

type CustomPredicate = Arc<dyn Fn(&MessageContext) -> bool + Send + Sync>;

/// Routes an inbound message's context to the binding (and therefore
/// agent) that should handle it (spec §4.2). Always returns a decision:
/// absence of any match falls back to a synthetic default binding.
pub struct BindingsRouter {
    /// Sorted by descending priority; ties preserve insertion order
    /// (a stable sort achieves this).
    bindings: Vec<Binding>,
    compiled_patterns: HashMap<String, Regex>,
    custom_predicates: HashMap<String, CustomPredicate>,
    default_agent_id: String,
}

const DEFAULT_BINDING_ID: &str = "__default__";

impl BindingsRouter {
    pub fn new(bindings: Vec<Binding>, default_agent_id: impl Into<String>) -> Result<Self, RouterError> {
        let mut compiled_patterns = HashMap::new();
        for binding in &bindings {
            if let Some(pattern) = &binding.match_.message_pattern {
                let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidPattern {
                    binding_id: binding.id.clone(),
                    source,
                })?;
                compiled_patterns.insert(binding.id.clone(), regex);
            }
        }

        let mut sorted = bindings;
        // Stable sort by descending priority preserves insertion order on ties.
        sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            bindings: sorted,
            compiled_patterns,
            custom_predicates: HashMap::new(),
            default_agent_id: default_agent_id.into(),
        })
    }

    /// Register an application-supplied predicate a binding's
    /// `match.custom` field can refer to by name (spec §4.2
    /// "`custom(context)` is an application-supplied predicate").
    pub fn register_custom_predicate(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&MessageContext) -> bool + Send + Sync + 'static,
    ) {
        self.custom_predicates.insert(name.into(), Arc::new(predicate));
    }

    fn default_binding(&self) -> Binding {
        Binding {
            id: DEFAULT_BINDING_ID.to_string(),
            agent_id: self.default_agent_id.clone(),
            priority: i64::MIN,
            enabled: true,
            match_: lanebridge_core::binding::BindingMatch::default(),
        }
    }

    /// Route one message context. Always returns a decision (falls back
    /// to the default agent when nothing matches).
    pub fn route(&self, ctx: &MessageContext) -> RouteDecision {
        for binding in &self.bindings {
            let custom_result = binding
                .match_
                .custom
                .as_ref()
                .map(|name| match self.custom_predicates.get(name) {
                    Some(predicate) => predicate(ctx),
                    None => {
                        tracing::warn!(
                            binding_id = %binding.id,
                            predicate = %name,
                            "custom predicate not registered; treating as non-match"
                        );
                        false
                    }
                });

            let compiled = self.compiled_patterns.get(&binding.id);
            if let Some(matched_by) = binding.matched_by(ctx, compiled, custom_result) {
                debug!(binding_id = %binding.id, agent_id = %binding.agent_id, ?matched_by, "binding matched");
                return RouteDecision {
                    agent_id: binding.agent_id.clone(),
                    binding: binding.clone(),
                    matched_by,
                };
            }
        }

        debug!(default_agent_id = %self.default_agent_id, "no binding matched; using default agent");
        let default = self.default_binding();
        RouteDecision {
            agent_id: default.agent_id.clone(),
            binding: default,
            matched_by: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanebridge_core::binding::{BindingMatch, MatchField};

    fn ctx(chat_type: &str, text: &str) -> MessageContext {
        MessageContext {
            channel_id: "feishu".into(),
            channel_type: "feishu".into(),
            chat_type: chat_type.into(),
            chat_id: "oc_1".into(),
            user_id: "ou_1".into(),
            message_text: text.into(),
        }
    }

    fn binding(id: &str, agent_id: &str, priority: i64, match_: BindingMatch) -> Binding {
        Binding {
            id: id.into(),
            agent_id: agent_id.into(),
            priority,
            enabled: true,
            match_,
        }
    }

    #[test]
    fn falls_back_to_default_when_nothing_matches() {
        let router = BindingsRouter::new(vec![], "opencode").unwrap();
        let decision = router.route(&ctx("group", "hi"));
        assert_eq!(decision.agent_id, "opencode");
        assert!(decision.matched_by.is_empty());
    }

    #[test]
    fn highest_priority_enabled_match_wins() {
        let low = binding(
            "low",
            "agent-low",
            1,
            BindingMatch {
                chat_type: Some(MatchField::One("group".into())),
                ..Default::default()
            },
        );
        let high = binding(
            "high",
            "agent-high",
            10,
            BindingMatch {
                chat_type: Some(MatchField::One("group".into())),
                ..Default::default()
            },
        );
        let router = BindingsRouter::new(vec![low, high], "default").unwrap();
        let decision = router.route(&ctx("group", "hi"));
        assert_eq!(decision.agent_id, "agent-high");
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let first = binding(
            "first",
            "agent-first",
            5,
            BindingMatch {
                chat_type: Some(MatchField::One("group".into())),
                ..Default::default()
            },
        );
        let second = binding(
            "second",
            "agent-second",
            5,
            BindingMatch {
                chat_type: Some(MatchField::One("group".into())),
                ..Default::default()
            },
        );
        let router = BindingsRouter::new(vec![first, second], "default").unwrap();
        let decision = router.route(&ctx("group", "hi"));
        assert_eq!(decision.agent_id, "agent-first");
    }

    #[test]
    fn disabled_bindings_are_skipped() {
        let mut disabled = binding("b1", "agent-1", 100, BindingMatch::default());
        disabled.enabled = false;
        let router = BindingsRouter::new(vec![disabled], "default").unwrap();
        let decision = router.route(&ctx("group", "hi"));
        assert_eq!(decision.agent_id, "default");
    }

    #[test]
    fn message_pattern_is_compiled_once_and_matched() {
        let binding = binding(
            "deploy",
            "agent-ci",
            0,
            BindingMatch {
                message_pattern: Some(r"^/deploy".into()),
                ..Default::default()
            },
        );
        let router = BindingsRouter::new(vec![binding], "default").unwrap();
        assert_eq!(router.route(&ctx("group", "/deploy prod")).agent_id, "agent-ci");
        assert_eq!(router.route(&ctx("group", "hello")).agent_id, "default");
    }

    #[test]
    fn invalid_regex_is_rejected_at_construction() {
        let binding = binding(
            "bad",
            "agent-1",
            0,
            BindingMatch {
                message_pattern: Some("(".into()),
                ..Default::default()
            },
        );
        let err = BindingsRouter::new(vec![binding], "default").unwrap_err();
        assert!(matches!(err, RouterError::InvalidPattern { .. }));
    }

    #[test]
    fn custom_predicate_is_invoked_by_name() {
        let binding = binding(
            "admins-only",
            "agent-admin",
            0,
            BindingMatch {
                custom: Some("is_admin".into()),
                ..Default::default()
            },
        );
        let mut router = BindingsRouter::new(vec![binding], "default").unwrap();
        router.register_custom_predicate("is_admin", |ctx| ctx.user_id == "ou_1");
        assert_eq!(router.route(&ctx("group", "hi")).agent_id, "agent-admin");
    }

    #[test]
    fn unregistered_custom_predicate_is_treated_as_non_match() {
        let binding = binding(
            "admins-only",
            "agent-admin",
            0,
            BindingMatch {
                custom: Some("missing".into()),
                ..Default::default()
            },
        );
        let router = BindingsRouter::new(vec![binding], "default").unwrap();
        assert_eq!(router.route(&ctx("group", "hi")).agent_id, "default");
    }

    #[test]
    fn explicit_wildcard_chat_type_matches_everything() {
        let binding = binding(
            "all-chats",
            "agent-any",
            0,
            BindingMatch {
                chat_type: Some(MatchField::One("*".into())),
                ..Default::default()
            },
        );
        let router = BindingsRouter::new(vec![binding], "default").unwrap();
        assert_eq!(router.route(&ctx("dm", "hi")).agent_id, "agent-any");
        assert_eq!(router.route(&ctx("group", "hi")).agent_id, "agent-any");
    }
}
