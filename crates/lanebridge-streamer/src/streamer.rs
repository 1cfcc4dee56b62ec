//! Card Streamer (spec §4.5 "C5 Card Streamer").
//!
//! Grounded on the teacher's `ResponsePoller` (`crate_bot_core/src/
//! handler.rs`): a loop that periodically re-checks state and pushes a
//! platform-facing side effect (there: a typing indicator; here: a card
//! update), generalized with the "pending flag checked on completion"
//! coalescing policy spec §9 calls out explicitly, plus bounded
//! rate-limit retry (spec §4.5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lanebridge_core::card::{Card, CardHeader, CardTemplate};
use lanebridge_core::part::OrderedPart;
use lanebridge_core::traits::Channel;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::render::{self, RenderConfig};

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("channel call failed: {0}")]
    Channel(#[from] anyhow::Error),
}

/// Tunables for the Card Streamer (spec §4.5 defaults).
#[derive(Debug, Clone, Copy)]
pub struct StreamerConfig {
    /// Default 500ms, floor 500ms (callers should not construct one lower).
    pub throttle_ms: u64,
    /// Default 600ms.
    pub retry_delay_ms: u64,
    /// Default 2.
    pub max_retries: u32,
    pub render: RenderConfig,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 500,
            retry_delay_ms: 600,
            max_retries: 2,
            render: RenderConfig::default(),
        }
    }
}

impl StreamerConfig {
    /// Clamp throttle to the spec's 500ms floor.
    pub fn with_throttle_ms(mut self, ms: u64) -> Self {
        self.throttle_ms = ms.max(500);
        self
    }
}

struct StreamerState {
    channel: Arc<dyn Channel>,
    chat_id: String,
    config: StreamerConfig,
    title: String,
    message_ids: Vec<String>,
    last_update: HashMap<String, DateTime<Utc>>,
    current_parts: Vec<OrderedPart>,
    rendering: bool,
    pending: bool,
    scheduled: bool,
    last_rendered_at: Option<std::time::Instant>,
    completed: bool,
}

/// Owns one response's card list and its update cadence (spec §3
/// "Streamer"). Cheaply cloneable: the inner state is `Arc<Mutex<_>>` so
/// the debounce's background flush task can share it.
#[derive(Clone)]
pub struct CardStreamer {
    inner: Arc<Mutex<StreamerState>>,
}

impl CardStreamer {
    pub fn new(channel: Arc<dyn Channel>, chat_id: impl Into<String>, title: impl Into<String>, config: StreamerConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamerState {
                channel,
                chat_id: chat_id.into(),
                config,
                title: title.into(),
                message_ids: Vec::new(),
                last_update: HashMap::new(),
                current_parts: Vec::new(),
                rendering: false,
                pending: false,
                scheduled: false,
                last_rendered_at: None,
                completed: false,
            })),
        }
    }

    pub async fn message_ids(&self) -> Vec<String> {
        self.inner.lock().await.message_ids.clone()
    }

    /// `start()` (spec §4.5): emit one initial card.
    pub async fn start(&self) -> Result<(), StreamerError> {
        let (channel, chat_id, title) = {
            let state = self.inner.lock().await;
            (state.channel.clone(), state.chat_id.clone(), state.title.clone())
        };
        let card = Card::new(CardHeader::new(title, CardTemplate::Processing));
        let message_id = channel.send_card(&chat_id, &card).await?;
        let mut state = self.inner.lock().await;
        state.message_ids.push(message_id.clone());
        state.last_update.insert(message_id, Utc::now());
        Ok(())
    }

    /// `setParts(parts)` (spec §4.5): update the buffer and schedule a render.
    pub async fn set_parts(&self, parts: Vec<OrderedPart>) {
        {
            let mut state = self.inner.lock().await;
            state.current_parts = parts;
        }
        self.request_render().await;
    }

    /// `append(text)` (spec §4.5): convenience wrapper that appends plain
    /// text to a single synthetic part rather than threading through the
    /// full Part Folder.
    pub async fn append(&self, text: &str) {
        const APPEND_PART_ID: &str = "__append__";
        let mut state = self.inner.lock().await;
        match state.current_parts.iter_mut().find(|p| p.part_id == APPEND_PART_ID) {
            Some(existing) => {
                if let lanebridge_core::part::PartPayload::Text { text: buf } = &mut existing.payload {
                    buf.push_str(text);
                }
            }
            None => state.current_parts.push(OrderedPart::text(APPEND_PART_ID, text)),
        }
        drop(state);
        self.request_render().await;
    }

    async fn request_render(&self) {
        let wait = {
            let mut state = self.inner.lock().await;
            if state.rendering {
                state.pending = true;
                return;
            }
            let elapsed = state.last_rendered_at.map(|t| t.elapsed());
            let throttle = Duration::from_millis(state.config.throttle_ms);
            match elapsed {
                Some(e) if e < throttle => Some(throttle - e),
                _ => None,
            }
        };

        match wait {
            None => self.flush().await,
            Some(wait) => {
                let mut state = self.inner.lock().await;
                if state.scheduled {
                    state.pending = true;
                    return;
                }
                state.scheduled = true;
                drop(state);
                let this = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(wait).await;
                    {
                        let mut state = this.inner.lock().await;
                        state.scheduled = false;
                    }
                    this.flush().await;
                });
            }
        }
    }

    /// Run renders until no more updates are pending (spec §9 "pending
    /// update flag ... collapse a burst of producer updates into one
    /// consumer render without losing the latest").
    async fn flush(&self) {
        loop {
            {
                let mut state = self.inner.lock().await;
                if state.rendering {
                    state.pending = true;
                    return;
                }
                state.rendering = true;
                state.pending = false;
            }

            let (parts, title, template, config) = {
                let state = self.inner.lock().await;
                let template = if state.completed { CardTemplate::Success } else { CardTemplate::Processing };
                (state.current_parts.clone(), state.title.clone(), template, state.config)
            };

            let elements = render::render_elements(&parts, &config.render);
            let cards = render::pack_into_cards(elements, &title, template, &config.render);
            self.sync_cards(cards).await;

            let mut state = self.inner.lock().await;
            state.rendering = false;
            state.last_rendered_at = Some(std::time::Instant::now());
            if !state.pending {
                break;
            }
        }
    }

    /// Card list sync (spec §4.5 "Card list sync"): update existing
    /// indices, create new ones for overflow, delete surplus for shrink.
    async fn sync_cards(&self, cards: Vec<Card>) {
        let (channel, chat_id, mut message_ids, retry_delay, max_retries) = {
            let state = self.inner.lock().await;
            (
                state.channel.clone(),
                state.chat_id.clone(),
                state.message_ids.clone(),
                Duration::from_millis(state.config.retry_delay_ms),
                state.config.max_retries,
            )
        };

        let n = cards.len();
        let m = message_ids.len();

        for (idx, card) in cards.iter().enumerate() {
            if idx < m {
                self.update_one(&channel, &message_ids[idx], card, retry_delay, max_retries).await;
            } else {
                match channel.send_card(&chat_id, card).await {
                    Ok(new_id) => message_ids.push(new_id),
                    Err(err) => warn!(error = %err, "failed to send continuation card"),
                }
            }
        }

        if m > n {
            for surplus_id in message_ids.split_off(n) {
                if let Err(err) = channel.delete_message(&surplus_id).await {
                    // Permanent/transient (spec §7): logged and ignored; the
                    // next full resend is the recovery path (SPEC_FULL §G).
                    warn!(message_id = %surplus_id, error = %err, "failed to delete surplus card");
                }
            }
        }

        let mut state = self.inner.lock().await;
        state.message_ids = message_ids;
        let now = Utc::now();
        for id in &state.message_ids {
            state.last_update.insert(id.clone(), now);
        }
    }

    /// One `updateCard` with bounded rate-limit retry (spec §4.5
    /// "Rate-limit retry").
    async fn update_one(&self, channel: &Arc<dyn Channel>, message_id: &str, card: &Card, retry_delay: Duration, max_retries: u32) {
        let mut attempt = 0;
        loop {
            match channel.update_card(message_id, card).await {
                Ok(result) if result.success => return,
                Ok(result) if result.rate_limited && attempt < max_retries => {
                    attempt += 1;
                    debug!(message_id, attempt, "rate limited, retrying after backoff");
                    tokio::time::sleep(retry_delay).await;
                }
                Ok(result) if result.rate_limited => {
                    warn!(message_id, "rate limit retries exhausted, skipping this update");
                    return;
                }
                Ok(_) => {
                    warn!(message_id, "card update failed (non-rate-limit); skipping this update");
                    return;
                }
                Err(err) => {
                    warn!(message_id, error = %err, "card update transport error; skipping this update");
                    return;
                }
            }
        }
    }

    /// `complete()` (spec §4.5): mark final, flush remaining updates,
    /// ensure terminal success template.
    pub async fn complete(&self) {
        {
            let mut state = self.inner.lock().await;
            state.completed = true;
        }
        self.flush().await;
    }

    /// `sendError(msg)` (spec §4.5): replace all cards with a single
    /// error card.
    pub async fn send_error(&self, msg: &str) {
        let (channel, chat_id, message_ids, title) = {
            let state = self.inner.lock().await;
            (state.channel.clone(), state.chat_id.clone(), state.message_ids.clone(), state.title.clone())
        };

        let mut card = Card::new(CardHeader::new(title, CardTemplate::Error));
        card.elements.push(lanebridge_core::card::CardElement::markdown(msg.to_string()));

        let mut remaining = message_ids;
        if let Some(first) = remaining.first().cloned() {
            self.update_one(&channel, &first, &card, Duration::from_millis(600), 0).await;
            for extra in remaining.split_off(1) {
                let _ = channel.delete_message(&extra).await;
            }
            remaining = vec![first];
        } else if let Ok(new_id) = channel.send_card(&chat_id, &card).await {
            remaining = vec![new_id];
        }

        let mut state = self.inner.lock().await;
        state.message_ids = remaining;
        state.completed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lanebridge_core::traits::UpdateResult;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as TokioMutex;

    struct MockChannel {
        sent: TokioMutex<Vec<Card>>,
        updated: TokioMutex<Vec<(String, Card)>>,
        deleted: TokioMutex<Vec<String>>,
        next_id: AtomicU32,
        rate_limit_then_succeed: AtomicU32,
    }

    impl MockChannel {
        fn new() -> Self {
            Self {
                sent: TokioMutex::new(Vec::new()),
                updated: TokioMutex::new(Vec::new()),
                deleted: TokioMutex::new(Vec::new()),
                next_id: AtomicU32::new(1),
                rate_limit_then_succeed: AtomicU32::new(0),
            }
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
        async fn send_card(&self, _chat_id: &str, card: &Card) -> anyhow::Result<String> {
            self.sent.lock().await.push(card.clone());
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("msg-{id}"))
        }
        async fn update_card(&self, message_id: &str, card: &Card) -> anyhow::Result<UpdateResult> {
            let remaining = self.rate_limit_then_succeed.load(Ordering::SeqCst);
            if remaining > 0 {
                self.rate_limit_then_succeed.fetch_sub(1, Ordering::SeqCst);
                return Ok(UpdateResult::rate_limited());
            }
            self.updated.lock().await.push((message_id.to_string(), card.clone()));
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

    fn fast_config() -> StreamerConfig {
        StreamerConfig { throttle_ms: 500, retry_delay_ms: 5, max_retries: 2, render: RenderConfig::default() }
    }

    #[tokio::test]
    async fn start_sends_one_processing_card() {
        let channel = Arc::new(MockChannel::new());
        let streamer = CardStreamer::new(channel.clone(), "chat-1", "Reply", fast_config());
        streamer.start().await.unwrap();
        assert_eq!(channel.sent.lock().await.len(), 1);
        assert_eq!(streamer.message_ids().await.len(), 1);
    }

    #[tokio::test]
    async fn complete_flushes_with_success_template() {
        let channel = Arc::new(MockChannel::new());
        let streamer = CardStreamer::new(channel.clone(), "chat-1", "Reply", fast_config());
        streamer.start().await.unwrap();
        streamer.set_parts(vec![OrderedPart::text("p1", "hello")]).await;
        streamer.complete().await;

        let updated = channel.updated.lock().await;
        let (_, last_card) = updated.last().expect("at least one update");
        assert_eq!(last_card.header.template, CardTemplate::Success);
    }

    #[tokio::test]
    async fn rate_limited_update_retries_then_succeeds() {
        let channel = Arc::new(MockChannel::new());
        channel.rate_limit_then_succeed.store(2, Ordering::SeqCst);
        let streamer = CardStreamer::new(channel.clone(), "chat-1", "Reply", fast_config());
        streamer.start().await.unwrap();
        streamer.complete().await;

        assert_eq!(channel.updated.lock().await.len(), 1, "exactly one successful update after retries");
    }

    #[tokio::test]
    async fn card_list_shrinks_and_deletes_surplus_messages() {
        let channel = Arc::new(MockChannel::new());
        let streamer = CardStreamer::new(
            channel.clone(),
            "chat-1",
            "Reply",
            StreamerConfig { render: RenderConfig { per_card_byte_budget: 120, ..RenderConfig::default() }, ..fast_config() },
        );
        streamer.start().await.unwrap();

        let big_parts: Vec<OrderedPart> = (0..8).map(|i| OrderedPart::text(format!("p{i}"), "x".repeat(40))).collect();
        streamer.set_parts(big_parts).await;
        streamer.complete().await;
        let cards_before = streamer.message_ids().await.len();
        assert!(cards_before > 1, "should have overflowed into continuation cards");

        streamer.set_parts(vec![OrderedPart::text("p0", "short")]).await;
        streamer.complete().await;

        let cards_after = streamer.message_ids().await.len();
        assert_eq!(cards_after, 1);
        assert!(!channel.deleted.lock().await.is_empty());
    }

    #[tokio::test]
    async fn send_error_replaces_all_cards_with_one_error_card() {
        let channel = Arc::new(MockChannel::new());
        let streamer = CardStreamer::new(
            channel.clone(),
            "chat-1",
            "Reply",
            StreamerConfig { render: RenderConfig { per_card_byte_budget: 80, ..RenderConfig::default() }, ..fast_config() },
        );
        streamer.start().await.unwrap();
        let big_parts: Vec<OrderedPart> = (0..5).map(|i| OrderedPart::text(format!("p{i}"), "x".repeat(40))).collect();
        streamer.set_parts(big_parts).await;
        streamer.complete().await;
        assert!(streamer.message_ids().await.len() > 1);

        streamer.send_error("agent backend disconnected").await;
        assert_eq!(streamer.message_ids().await.len(), 1);
    }
}
