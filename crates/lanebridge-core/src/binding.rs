//! Bindings Router data model (spec §3 "Binding", §4.2 "Bindings Router").

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A field that may be matched against a single string or a list of
/// alternatives ("Match fields that are string-or-list accept either",
/// spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchField {
    One(String),
    Many(Vec<String>),
}

impl MatchField {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            MatchField::One(one) => one == value,
            MatchField::Many(many) => many.iter().any(|candidate| candidate == value),
        }
    }
}

/// The context a single inbound message is routed on.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub channel_id: String,
    pub channel_type: String,
    pub chat_type: String,
    pub chat_id: String,
    pub user_id: String,
    pub message_text: String,
}

/// The `match` object of a [`Binding`]. Every present field is ANDed;
/// an absent field is a wildcard. `chat_type = "*"` is an explicit
/// wildcard with the same effect as leaving the field absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingMatch {
    pub channel_id: Option<MatchField>,
    pub channel_type: Option<MatchField>,
    pub chat_type: Option<MatchField>,
    pub chat_id: Option<MatchField>,
    pub user_id: Option<MatchField>,
    /// Regex source; compiled lazily by the router (regex::Regex isn't
    /// (de)serializable, so we keep the source string here and compile
    /// once when the binding is registered).
    pub message_pattern: Option<String>,
    /// Name of an application-registered predicate (spec §4.2
    /// "`custom(context)` is an application-supplied predicate").
    pub custom: Option<String>,
}

fn field_matches(field: &Option<MatchField>, value: &str) -> bool {
    match field {
        None => true,
        Some(MatchField::One(one)) if one == "*" => true,
        Some(MatchField::Many(many)) if many.iter().any(|v| v == "*") => true,
        Some(field) => field.contains(value),
    }
}

/// A routing rule (spec §3 "Binding").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub id: String,
    pub agent_id: String,
    pub priority: i64,
    pub enabled: bool,
    #[serde(rename = "match")]
    pub match_: BindingMatch,
}

impl Binding {
    /// Names of the match fields that were present and satisfied, or
    /// `None` if any present field failed to match. An empty vector
    /// means the binding is an unconditional wildcard.
    ///
    /// `compiled_pattern` is passed in because `Regex` can't live inside
    /// the (de)serializable `BindingMatch`; `custom_result` is the
    /// caller-evaluated outcome of `match_.custom`, if set.
    pub fn matched_by(
        &self,
        ctx: &MessageContext,
        compiled_pattern: Option<&Regex>,
        custom_result: Option<bool>,
    ) -> Option<Vec<&'static str>> {
        if !self.enabled {
            return None;
        }

        let mut matched = Vec::new();

        macro_rules! check {
            ($field:expr, $value:expr, $label:literal) => {
                if $field.is_some() {
                    if !field_matches($field, $value) {
                        return None;
                    }
                    matched.push($label);
                }
            };
        }

        check!(&self.match_.channel_id, &ctx.channel_id, "channel_id");
        check!(&self.match_.channel_type, &ctx.channel_type, "channel_type");
        check!(&self.match_.chat_type, &ctx.chat_type, "chat_type");
        check!(&self.match_.chat_id, &ctx.chat_id, "chat_id");
        check!(&self.match_.user_id, &ctx.user_id, "user_id");

        if self.match_.message_pattern.is_some() {
            match compiled_pattern {
                Some(re) if re.is_match(&ctx.message_text) => matched.push("message_pattern"),
                _ => return None,
            }
        }

        if self.match_.custom.is_some() {
            match custom_result {
                Some(true) => matched.push("custom"),
                _ => return None,
            }
        }

        Some(matched)
    }
}

/// Outcome of [`crate::traits`]-level routing: the binding that won (or
/// the synthetic default), the agent it routes to, and which match
/// fields contributed (spec §4.2 `route(context) -> {binding, agentId,
/// matchedBy[]}`).
#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub binding: Binding,
    pub agent_id: String,
    pub matched_by: Vec<&'static str>,
}
