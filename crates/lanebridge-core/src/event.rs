//! Backend event shapes (spec §3 "EventRecord", §6 "Agent backend" event
//! types, §9 "child-session id field union").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// `eventId`-keyed record used for duplicate suppression within a
/// configurable window (spec §3, default 5 min).
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(event_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The event `type` values the core must handle (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    MessagePartUpdated,
    SessionIdle,
    SessionCreated,
    SessionError,
    MessageUpdated,
    SessionUpdated,
    QuestionAsked,
    QuestionReplied,
    QuestionRejected,
    /// Anything the backend sends that isn't in the table above. Logged
    /// and otherwise ignored (spec §7 "unknown event type").
    Unknown,
}

impl EventKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "message.part.updated" => EventKind::MessagePartUpdated,
            "session.idle" => EventKind::SessionIdle,
            "session.created" => EventKind::SessionCreated,
            "session.error" => EventKind::SessionError,
            "message.updated" => EventKind::MessageUpdated,
            "session.updated" => EventKind::SessionUpdated,
            "question.asked" => EventKind::QuestionAsked,
            "question.replied" => EventKind::QuestionReplied,
            "question.rejected" => EventKind::QuestionRejected,
            other => {
                warn!(event_type = other, "unknown agent event type");
                EventKind::Unknown
            }
        }
    }
}

/// One event off an `Agent::subscribe_events` stream. `properties` is the
/// raw backend payload; typed accessors below implement the documented
/// field-union heuristics so there is a single place that knows about the
/// backend's inconsistent event shapes (spec §9 Open Questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind_raw: String,
    pub properties: Value,
}

impl AgentEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::from_wire(&self.kind_raw)
    }

    /// The session this event is nominally about. Different event kinds
    /// carry it under different keys; this checks the documented union in
    /// a fixed, logged order.
    pub fn session_id(&self) -> Option<&str> {
        self.properties
            .get("sessionID")
            .and_then(Value::as_str)
            .or_else(|| {
                self.properties
                    .get("part")
                    .and_then(|p| p.get("sessionID"))
                    .and_then(Value::as_str)
            })
            .or_else(|| {
                self.properties
                    .get("info")
                    .and_then(|i| i.get("id"))
                    .and_then(Value::as_str)
            })
            .or_else(|| {
                let found = self.properties.get("session_id").and_then(Value::as_str);
                if found.is_none() {
                    warn!(
                        event_id = %self.event_id,
                        kind = ?self.kind(),
                        "agent event carried no recognizable session id field"
                    );
                }
                found
            })
    }

    /// `parentID` present on `session.created` events (spec §4.8).
    pub fn parent_session_id(&self) -> Option<&str> {
        self.properties.get("parentID").and_then(Value::as_str)
    }

    pub fn part_id(&self) -> Option<&str> {
        self.properties
            .get("part")
            .and_then(|p| p.get("id"))
            .and_then(Value::as_str)
    }
}
