//! Periodic sweeper (spec §4.3 "Sweeper"): evicts stale `EventRecord`s and
//! idles out sessions past `idleTimeout` that aren't processing.
//!
//! Grounded on the Lane Queue's idle-lane reaper (`lanebridge-laneq`'s
//! `tokio::spawn` + `tokio::time::interval` loop) and the teacher's
//! `ResponsePoller` polling loop (`handler.rs`) — same "wake on a fixed
//! period, re-check owned state" shape, generalized from one in-flight
//! response to the whole session table.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::SessionManager;

/// Configuration for the periodic [`Sweeper`] (spec §4.3, default period
/// 60s; default idle timeout left to the caller since it is not fixed by
/// the spec).
#[derive(Debug, Clone, Copy)]
pub struct SweeperConfig {
    pub period: Duration,
    pub idle_timeout_ms: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            idle_timeout_ms: 30 * 60 * 1000,
        }
    }
}

/// Owns the background task that periodically calls
/// [`SessionManager::sweep_once`]. Dropping the `Sweeper` aborts the task.
pub struct Sweeper {
    handle: tokio::task::JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(manager: Arc<SessionManager>, config: SweeperConfig) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.period);
            loop {
                ticker.tick().await;
                debug!("session sweeper tick");
                manager.sweep_once(config.idle_timeout_ms);
            }
        });
        Self { handle }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures::stream;
    use lanebridge_core::{Agent, AgentEventStream, CompactResult, ModelInfo, SessionDetail, SessionDetailSummary, SessionKey, SessionStatus};
    use serde_json::Value;

    struct StubAgent;

    #[async_trait]
    impl Agent for StubAgent {
        fn agent_id(&self) -> &str {
            "opencode"
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
            Ok(Box::pin(stream::empty()))
        }
    }

    #[tokio::test]
    async fn sweeper_idles_out_a_stale_session_in_the_background() {
        let manager = Arc::new(SessionManager::new(Arc::new(StubAgent), 5_000));
        let key = SessionKey::chat("feishu", "oc_1").unwrap();
        manager.get_or_create_session(&key, "/proj", None).await.unwrap();
        manager
            .update_session(&key, |s| s.last_active_at = Utc::now() - chrono::Duration::seconds(120))
            .unwrap();

        let _sweeper = Sweeper::spawn(
            manager.clone(),
            SweeperConfig { period: Duration::from_millis(20), idle_timeout_ms: 60_000 },
        );

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(manager.get(&key).unwrap().status, SessionStatus::Idle);
    }
}
