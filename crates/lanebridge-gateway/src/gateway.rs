//! The Gateway (spec §4.7 "C7 Gateway"): wires every other component into
//! one inbound-message pipeline.
//!
//! Grounded on the teacher's `bot-core` shared between `bin/telegram` and
//! `bin/discord`: one struct holding per-platform `Channel` handles, the
//! agent backend, and the policy/session/streaming state, with a single
//! `handle_update`-style entry point. Generalized here from one platform's
//! bot loop to a router-driven, multi-channel, multi-agent pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::DashMap;
use futures::StreamExt;
use lanebridge_config::GatewayConfig;
use lanebridge_core::binding::MessageContext;
use lanebridge_core::card::SelectOption;
use lanebridge_core::event::{AgentEvent, EventKind};
use lanebridge_core::part::{is_delegation_tool, PartPayload, ToolCallState};
use lanebridge_core::question::{PendingQuestion, Question, QuestionKind};
use lanebridge_core::session_key::SessionKey;
use lanebridge_core::traits::{Agent, Channel};
use lanebridge_laneq::LaneQueue;
use lanebridge_protocol::question::render_question_card;
use lanebridge_protocol::{QuestionProtocol, RecallHandler, SubtaskTracker};
use lanebridge_router::{BindingsRouter, RouterError};
use lanebridge_session::{Sweeper, SweeperConfig};
use lanebridge_streamer::fold::PartFolder;
use lanebridge_streamer::streamer::{CardStreamer, StreamerConfig};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::commands::{CommandDispatcher, CommandOutcome, NoopCommandDispatcher};
use crate::policy::ChatPolicy;

/// All mutable wiring state for one gateway process (spec §4.7 "State").
pub struct Gateway {
    channels: DashMap<String, Arc<dyn Channel>>,
    agents: DashMap<String, Arc<dyn Agent>>,
    router: BindingsRouter,
    policy: ChatPolicy,
    commands: Arc<dyn CommandDispatcher>,
    lanes: LaneQueue,
    sessions: Arc<lanebridge_session::SessionManager>,
    questions: Arc<QuestionProtocol>,
    subtasks: Arc<SubtaskTracker>,
    recall: Arc<RecallHandler>,
    /// One folder per parent session, keyed by [`SessionKey`]'s string form.
    folders: DashMap<String, Arc<Mutex<PartFolder>>>,
    /// One streamer per parent session; rotated (removed) whenever a fresh
    /// card should start, e.g. after a question is answered (spec §8
    /// scenario 6).
    streamers: DashMap<String, CardStreamer>,
    /// Bot message ids already handed to the [`RecallHandler`], keyed by
    /// parent session key string, so a card re-render doesn't re-record
    /// message ids the streamer already owns (spec §4.9 needs every bot
    /// reply tracked, not just the first one per response).
    recall_tracked: DashMap<String, Vec<String>>,
    /// The inbound user message currently being processed for each
    /// parent session key, so newly observed bot message ids can be
    /// attributed to the right recall record.
    active_user_message: DashMap<String, String>,
    default_project_path: String,
    streamer_config: StreamerConfig,
    sweeper_config: SweeperConfig,
    sweeper: StdMutex<Option<Sweeper>>,
    running: AtomicBool,
}

impl Gateway {
    /// Build a `Gateway` from a loaded [`GatewayConfig`] and the backend
    /// that will service `config.default_agent_id` (SPEC_FULL §E.1). The
    /// default agent is registered automatically; call
    /// [`Self::register_agent`] for any others a `Binding` might route to.
    pub fn from_config(config: &GatewayConfig, default_agent: Arc<dyn Agent>) -> Result<Self, RouterError> {
        let router = BindingsRouter::new(config.bindings.clone(), config.default_agent_id.clone())?;
        let sessions = Arc::new(lanebridge_session::SessionManager::new(
            default_agent.clone(),
            config.session.dedupe_window_ms,
        ));
        let agents = DashMap::new();
        agents.insert(default_agent.agent_id().to_string(), default_agent);

        Ok(Self {
            channels: DashMap::new(),
            agents,
            router,
            policy: ChatPolicy::default(),
            commands: Arc::new(NoopCommandDispatcher),
            lanes: LaneQueue::new(config.lane.into()),
            sessions,
            questions: Arc::new(QuestionProtocol::new()),
            subtasks: Arc::new(SubtaskTracker::new()),
            recall: Arc::new(RecallHandler::default()),
            folders: DashMap::new(),
            streamers: DashMap::new(),
            recall_tracked: DashMap::new(),
            active_user_message: DashMap::new(),
            default_project_path: "/workspace".to_string(),
            streamer_config: config.streamer.into(),
            sweeper_config: SweeperConfig {
                period: Duration::from_secs(config.session.sweep_period_secs),
                idle_timeout_ms: config.session.idle_timeout_ms,
            },
            sweeper: StdMutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    pub fn with_policy(mut self, policy: ChatPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_command_dispatcher(mut self, dispatcher: Arc<dyn CommandDispatcher>) -> Self {
        self.commands = dispatcher;
        self
    }

    pub fn with_default_project_path(mut self, path: impl Into<String>) -> Self {
        self.default_project_path = path.into();
        self
    }

    /// Register (or replace) a `Channel` handle keyed by its own id
    /// (spec §9 "registration keyed by string id").
    pub fn register_channel(&self, channel: Arc<dyn Channel>) {
        self.channels.insert(channel.channel_id().to_string(), channel);
    }

    /// Register (or replace) an `Agent` backend handle.
    pub fn register_agent(&self, agent: Arc<dyn Agent>) {
        self.sessions.register_agent(agent.clone());
        self.agents.insert(agent.agent_id().to_string(), agent);
    }

    pub fn recall_handler(&self) -> Arc<RecallHandler> {
        self.recall.clone()
    }

    pub fn session_manager(&self) -> Arc<lanebridge_session::SessionManager> {
        self.sessions.clone()
    }

    /// Idempotent start: spawns the session sweeper. Calling this twice
    /// while already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.sweeper.lock().expect("sweeper mutex poisoned");
        *guard = Some(Sweeper::spawn(self.sessions.clone(), self.sweeper_config));
        debug!("gateway started");
    }

    /// Idempotent stop: stops accepting new messages and drops the
    /// sweeper (aborting its background task). In-flight lane work is
    /// left to finish on its own.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut guard = self.sweeper.lock().expect("sweeper mutex poisoned");
        *guard = None;
        debug!("gateway stopped");
    }

    /// One inbound chat message (spec §4.7 pipeline). Accepted messages
    /// are enqueued on the lane `"{channelId}:{chatId}"` (C1) and
    /// processed in the background; this returns once the message has
    /// been accepted (or rejected by a command/policy gate), not once a
    /// reply has been produced.
    pub async fn handle_message(
        self: &Arc<Self>,
        ctx: MessageContext,
        user_message_id: impl Into<String>,
    ) -> anyhow::Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            anyhow::bail!("gateway is not running");
        }
        let user_message_id = user_message_id.into();

        if matches!(self.commands.dispatch(&ctx).await?, CommandOutcome::Handled) {
            return Ok(());
        }

        if !self.policy.should_process(&ctx) {
            debug!(chat_id = %ctx.chat_id, user_id = %ctx.user_id, "message dropped by chat policy");
            return Ok(());
        }

        if self.questions.has_pending(&ctx.chat_id) {
            return self.handle_question_answer(&ctx).await;
        }

        let decision = self.router.route(&ctx);
        let agent = self
            .agents
            .get(&decision.agent_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| anyhow::anyhow!("no agent registered for id {:?}", decision.agent_id))?;
        let channel = self
            .channels
            .get(&ctx.channel_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| anyhow::anyhow!("no channel registered for id {:?}", ctx.channel_id))?;

        self.recall.record_user_message(&user_message_id, &ctx.chat_id);

        let lane_key = format!("{}:{}", ctx.channel_id, ctx.chat_id);
        let gateway = self.clone();
        let gateway_for_work = self.clone();
        tokio::spawn(async move {
            let work = async move { gateway_for_work.process_message(ctx, user_message_id, agent, channel).await };
            match gateway.lanes.enqueue(lane_key, work).await {
                Ok(Err(err)) => warn!(error = %err, "message processing failed"),
                Err(err) => warn!(error = %err, "lane enqueue failed"),
                Ok(Ok(())) => {}
            }
        });

        Ok(())
    }

    /// Free-text answer to a pending question (spec §4.6): resolved
    /// before routing since it isn't a new prompt for the Bindings Router.
    async fn handle_question_answer(&self, ctx: &MessageContext) -> anyhow::Result<()> {
        let Some(pending) = self.questions.pending_for(&ctx.chat_id) else {
            return Ok(());
        };
        let Some(answers) = self.questions.submit_text(&ctx.chat_id, &ctx.message_text) else {
            return Ok(());
        };

        let key = SessionKey::chat(ctx.channel_id.clone(), ctx.chat_id.clone())?;
        if let Some(session) = self.sessions.get(&key) {
            if let Some(agent) = self.agents.get(&session.agent_id) {
                agent.reply_question(&pending.request_id, answers).await?;
            }
        }
        // Next part-update on this session opens a fresh card rather than
        // continuing to update the one shown alongside the question.
        self.streamers.remove(&key.to_string());
        Ok(())
    }

    /// Steps (d)-(i) of spec §4.7: resolve the session, open a streamer,
    /// send the prompt, and drive the Part Folder / Card Streamer /
    /// Sub-task Tracker / Question Protocol from the agent's event stream
    /// until the parent session goes idle or errors.
    async fn process_message(
        self: Arc<Self>,
        ctx: MessageContext,
        user_message_id: String,
        agent: Arc<dyn Agent>,
        channel: Arc<dyn Channel>,
    ) -> anyhow::Result<()> {
        let key = SessionKey::chat(ctx.channel_id.clone(), ctx.chat_id.clone())?;
        let key_str = key.to_string();

        let session = self.sessions.get_or_create_session(&key, &self.default_project_path, None).await?;
        if session.agent_id != agent.agent_id() {
            self.sessions.switch_agent(&key, agent.clone()).await?;
        }
        let session = self.sessions.get(&key).unwrap_or(session);
        let routed_agent_id = session.agent_id.clone();
        let backend_session_id = session.agent_session_id.clone();

        let folder_lock = self
            .folders
            .entry(key_str.clone())
            .or_insert_with(|| Arc::new(Mutex::new(PartFolder::new())))
            .clone();

        self.active_user_message.insert(key_str.clone(), user_message_id.clone());
        let cancel = self.sessions.start_task(&key, &user_message_id);
        let _ = self.ensure_streamer(&key_str, &channel, &ctx.chat_id).await?;
        self.track_new_bot_messages(&key_str).await;

        agent
            .send_prompt(&backend_session_id, vec![json!({"type": "text", "text": ctx.message_text})], session.model.as_deref())
            .await?;

        let mut events = agent.subscribe_events(&backend_session_id).await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(key = %key_str, "processing task aborted");
                    break;
                }
                next = events.next() => {
                    let Some(event) = next else { break };
                    if self.sessions.is_duplicate_event(&event.event_id) {
                        continue;
                    }
                    self.sessions.mark_event_processed(&event.event_id);

                    let terminal = self
                        .apply_event(&key, &key_str, &backend_session_id, &routed_agent_id, &folder_lock, &channel, &agent, &event)
                        .await?;
                    if terminal {
                        break;
                    }
                }
            }
        }

        self.sessions.complete_task(&key);
        self.active_user_message.remove(&key_str);
        Ok(())
    }

    /// Diff a streamer's current `messageIds` against what's already been
    /// handed to the [`RecallHandler`] and record the new ones (spec §4.9:
    /// every bot reply in the chat, not just the first card of a
    /// response, is a recall-deletion candidate).
    async fn track_new_bot_messages(&self, key_str: &str) {
        let Some(streamer) = self.streamers.get(key_str).map(|entry| entry.clone()) else { return };
        let Some(user_message_id) = self.active_user_message.get(key_str).map(|entry| entry.clone()) else { return };
        let chat_id = match SessionKey::parse(key_str) {
            Ok(key) => key.chat_id().unwrap_or_default().to_string(),
            Err(_) => return,
        };

        let current = streamer.message_ids().await;
        let mut tracked = self.recall_tracked.entry(key_str.to_string()).or_default();
        for message_id in &current {
            if !tracked.contains(message_id) {
                self.recall.record_bot_message(&user_message_id, &chat_id, message_id);
                tracked.push(message_id.clone());
            }
        }
    }

    async fn ensure_streamer(&self, key_str: &str, channel: &Arc<dyn Channel>, chat_id: &str) -> anyhow::Result<CardStreamer> {
        if let Some(existing) = self.streamers.get(key_str) {
            return Ok(existing.clone());
        }
        let streamer = CardStreamer::new(channel.clone(), chat_id.to_string(), "Working...", self.streamer_config);
        streamer.start().await?;
        self.streamers.insert(key_str.to_string(), streamer.clone());
        Ok(streamer)
    }

    /// Apply one agent event against the running pipeline. Returns
    /// `Ok(true)` once the parent session has reached a terminal state
    /// (`session.idle` / `session.error`) and the processing loop should
    /// stop.
    #[allow(clippy::too_many_arguments)]
    async fn apply_event(
        &self,
        key: &SessionKey,
        key_str: &str,
        backend_session_id: &str,
        parent_agent_session_id: &str,
        folder_lock: &Arc<Mutex<PartFolder>>,
        channel: &Arc<dyn Channel>,
        agent: &Arc<dyn Agent>,
        event: &AgentEvent,
    ) -> anyhow::Result<bool> {
        let _ = parent_agent_session_id;
        let Some(event_session_id) = event.session_id() else {
            return Ok(false);
        };

        if event_session_id == backend_session_id {
            return self.apply_parent_event(key, key_str, folder_lock, channel, event).await;
        }

        if self.subtasks.is_known_child(event_session_id) {
            self.apply_child_event(key, key_str, event_session_id.to_string(), folder_lock, channel, agent, event).await?;
            return Ok(false);
        }

        if event.kind() == EventKind::SessionCreated && event.parent_session_id() == Some(backend_session_id) {
            let child_id = event_session_id.to_string();
            let mut folder = folder_lock.lock().await;
            if let Some(part_id) = folder.nearest_running_delegation().map(str::to_string) {
                drop(folder);
                let background = self.subtasks.reserved_background(&part_id);
                self.subtasks.attribute_child(&child_id, &part_id, background);
                self.sessions.attach_subtask(key, &child_id);
            }
            return Ok(false);
        }

        debug!(event_session_id, "event for an unattributed session id; ignoring");
        Ok(false)
    }

    async fn apply_parent_event(
        &self,
        key: &SessionKey,
        key_str: &str,
        folder_lock: &Arc<Mutex<PartFolder>>,
        channel: &Arc<dyn Channel>,
        event: &AgentEvent,
    ) -> anyhow::Result<bool> {
        match event.kind() {
            EventKind::MessagePartUpdated => {
                let changed = {
                    let mut folder = folder_lock.lock().await;
                    let changed = folder.fold_event(event).unwrap_or_else(|err| {
                        warn!(error = %err, "failed to fold event");
                        false
                    });
                    if changed {
                        if let Some(part_id) = event.part_id() {
                            self.apply_delegation_transition(&mut folder, part_id);
                        }
                    }
                    changed
                };
                if changed {
                    let parts = folder_lock.lock().await.parts().to_vec();
                    let streamer = self.ensure_streamer(key_str, channel, key.chat_id().unwrap_or_default()).await?;
                    streamer.set_parts(parts).await;
                    self.track_new_bot_messages(key_str).await;
                }
                Ok(false)
            }
            EventKind::QuestionAsked => {
                let chat_id = key.chat_id().unwrap_or_default();
                // Spec §4.6 steps 1+4: complete the streamer that was
                // active for this response so the question card renders
                // below it, and drop it so the next part-update (after
                // the question is answered) opens a fresh one instead of
                // appending to the one shown alongside the question.
                if let Some(streamer) = self.streamers.get(key_str) {
                    streamer.complete().await;
                }
                self.streamers.remove(key_str);
                if let Some(pq) = pending_question_from_event(event, chat_id) {
                    self.questions.ask(pq.clone());
                    let card = render_question_card(&pq, false);
                    if let Ok(message_id) = channel.send_card(chat_id, &card).await {
                        if let Some(user_message_id) = self.active_user_message.get(key_str).map(|e| e.clone()) {
                            self.recall.record_bot_message(&user_message_id, chat_id, &message_id);
                        }
                    }
                }
                Ok(false)
            }
            EventKind::QuestionReplied | EventKind::QuestionRejected => {
                self.questions.clear(key.chat_id().unwrap_or_default());
                Ok(false)
            }
            EventKind::SessionIdle => {
                if let Some(streamer) = self.streamers.get(key_str) {
                    streamer.complete().await;
                }
                self.track_new_bot_messages(key_str).await;
                Ok(true)
            }
            EventKind::SessionError => {
                let message = event.properties.get("error").and_then(|v| v.as_str()).unwrap_or("agent session error");
                if let Some(streamer) = self.streamers.get(key_str) {
                    streamer.send_error(message).await;
                }
                self.track_new_bot_messages(key_str).await;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// When a `delegate_task`/`task` tool-call enters `running`, reserve
    /// its attribution slot; when one reports `completed`, apply the
    /// background-pending display override (spec §4.8).
    fn apply_delegation_transition(&self, folder: &mut PartFolder, part_id: &str) {
        let Some(part) = folder.parts().iter().find(|p| p.part_id == part_id) else {
            return;
        };
        let Some(name) = part.tool_name() else { return };
        if !is_delegation_tool(name) {
            return;
        }

        match part.tool_state() {
            Some(ToolCallState::Running) => {
                let background = match &part.payload {
                    PartPayload::ToolCall { input, .. } => input.get("run_in_background").and_then(|v| v.as_bool()).unwrap_or(false),
                    _ => false,
                };
                self.subtasks.reserve(part_id, background);
            }
            Some(ToolCallState::Completed) => {
                let adjusted = self.subtasks.adjust_completion_state(part_id, ToolCallState::Completed);
                if adjusted != ToolCallState::Completed {
                    folder.set_tool_state(part_id, adjusted);
                }
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply_child_event(
        &self,
        key: &SessionKey,
        key_str: &str,
        child_session_id: String,
        folder_lock: &Arc<Mutex<PartFolder>>,
        channel: &Arc<dyn Channel>,
        agent: &Arc<dyn Agent>,
        event: &AgentEvent,
    ) -> anyhow::Result<()> {
        let changed = if event.kind() == EventKind::SessionIdle {
            let mut folder = folder_lock.lock().await;
            self.subtasks.handle_child_idle(&mut folder, agent.as_ref(), &child_session_id).await?
        } else {
            let mut folder = folder_lock.lock().await;
            self.subtasks.apply_child_event(&mut folder, &child_session_id, event)
        };

        if changed {
            let parts = folder_lock.lock().await.parts().to_vec();
            let streamer = self.ensure_streamer(key_str, channel, key.chat_id().unwrap_or_default()).await?;
            streamer.set_parts(parts).await;
            self.track_new_bot_messages(key_str).await;
        }
        Ok(())
    }

    /// Recall handling (spec §4.9): delete replies issued at or after the
    /// recalled user message and abort whatever task it kicked off.
    pub async fn handle_recall(&self, user_message_id: &str, channel_id: &str, chat_id: &str) -> anyhow::Result<lanebridge_protocol::RecallOutcome> {
        let key = SessionKey::chat(channel_id.to_string(), chat_id.to_string())?;
        let channel = self
            .channels
            .get(channel_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| anyhow::anyhow!("no channel registered for id {:?}", channel_id))?;
        Ok(self.recall.handle_recall(user_message_id, channel.as_ref(), &self.sessions, &key).await)
    }

    /// Card action with `form_value` (spec §6 inbound event, §4.6 "Form
    /// submit" path): map each question's selected option indices back
    /// to labels, and once every question in the pending set has an
    /// answer, reply to the agent and update the question card to its
    /// answered variant.
    ///
    /// `form_values` maps question id (the form field `name` rendered by
    /// [`render_question_card`]) to the selected option indices.
    pub async fn handle_card_action(
        &self,
        channel_id: &str,
        chat_id: &str,
        event_id: &str,
        form_values: std::collections::HashMap<String, Vec<usize>>,
    ) -> anyhow::Result<()> {
        if self.sessions.is_duplicate_event(event_id) {
            return Ok(());
        }
        self.sessions.mark_event_processed(event_id);

        let Some(pending) = self.questions.pending_for(chat_id) else {
            debug!(chat_id, "card action for a chat with no pending question; ignoring");
            return Ok(());
        };

        let mut final_answers = None;
        for (question_id, option_indices) in &form_values {
            let Some(question_index) = pending.questions.iter().position(|q| &q.id == question_id) else {
                warn!(chat_id, question_id, "form value for an unknown question id; ignoring");
                continue;
            };
            match self.questions.submit_form(chat_id, question_index, option_indices) {
                Ok(Some(answers)) => final_answers = Some(answers),
                Ok(None) => {}
                Err(err) => warn!(chat_id, error = %err, "failed to record form answer"),
            }
        }

        let Some(answers) = final_answers else {
            return Ok(());
        };

        let key = SessionKey::chat(channel_id.to_string(), chat_id.to_string())?;
        if let Some(session) = self.sessions.get(&key) {
            if let Some(agent) = self.agents.get(&session.agent_id) {
                agent.reply_question(&pending.request_id, answers).await?;
            }
        }

        if let Some(channel) = self.channels.get(channel_id).map(|entry| entry.clone()) {
            let answered = pending.clone();
            let card = render_question_card(&answered, true);
            if !answered.message_id.is_empty() {
                let _ = channel.update_card(&answered.message_id, &card).await;
            }
        }

        // Next part-update on this session opens a fresh card (spec §4.6
        // step 4 "needsNewCard"), same as the free-text answer path.
        self.streamers.remove(&key.to_string());
        Ok(())
    }

    /// Bot removed from a chat / chat disbanded (spec §6 inbound events):
    /// tear down every piece of per-chat state the way `deleteSession`
    /// plus the gateway's own card/protocol bookkeeping requires.
    pub async fn handle_chat_removed(&self, channel_id: &str, chat_id: &str, event_id: &str) -> anyhow::Result<()> {
        if self.sessions.is_duplicate_event(event_id) {
            return Ok(());
        }
        self.sessions.mark_event_processed(event_id);

        let key = SessionKey::chat(channel_id.to_string(), chat_id.to_string())?;
        let key_str = key.to_string();

        let _ = self.sessions.abort_task(&key).await;
        self.sessions.delete_session(&key);
        self.questions.clear(chat_id);
        self.folders.remove(&key_str);
        self.streamers.remove(&key_str);
        self.recall_tracked.remove(&key_str);
        self.active_user_message.remove(&key_str);
        debug!(channel_id, chat_id, "chat torn down");
        Ok(())
    }

    /// User left a chat (spec §6 inbound event): ambient membership
    /// bookkeeping only — the spec's component design (§4) does not
    /// attach any session-teardown behavior to this event, unlike bot
    /// removal / chat disbandment above.
    pub fn handle_user_left(&self, chat_id: &str, user_id: &str, event_id: &str) {
        if self.sessions.is_duplicate_event(event_id) {
            return;
        }
        self.sessions.mark_event_processed(event_id);
        if let Some(mut group) = self.sessions.group(chat_id) {
            group.member_ids.remove(user_id);
            self.sessions.register_group(group);
        }
    }

    /// Menu click (spec §6 inbound event): dispatched through the same
    /// `CommandDispatcher` extension point as slash commands, since both
    /// are out-of-scope collaborators (spec §1 "TUI-free command
    /// parsing") that this gateway only provides a seam for.
    pub async fn handle_menu_click(&self, ctx: MessageContext, event_id: &str) -> anyhow::Result<()> {
        if self.sessions.is_duplicate_event(event_id) {
            return Ok(());
        }
        self.sessions.mark_event_processed(event_id);
        let _ = self.commands.dispatch(&ctx).await?;
        Ok(())
    }
}

fn pending_question_from_event(event: &AgentEvent, chat_id: &str) -> Option<PendingQuestion> {
    let request_id = event
        .properties
        .get("requestID")
        .or_else(|| event.properties.get("request_id"))
        .and_then(|v| v.as_str())?;
    let message_id = event
        .properties
        .get("messageID")
        .or_else(|| event.properties.get("message_id"))
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let questions_raw = event.properties.get("questions")?.as_array()?;

    let mut questions = Vec::with_capacity(questions_raw.len());
    for raw in questions_raw {
        let id = raw.get("id")?.as_str()?.to_string();
        let text = raw.get("text")?.as_str()?.to_string();
        let kind = match raw.get("kind").and_then(|v| v.as_str()) {
            Some("multiple") => QuestionKind::Multiple,
            _ => QuestionKind::Single,
        };
        let options = raw
            .get("options")?
            .as_array()?
            .iter()
            .filter_map(|opt| {
                Some(SelectOption {
                    value: opt.get("value")?.as_str()?.to_string(),
                    label: opt.get("label")?.as_str()?.to_string(),
                })
            })
            .collect();
        questions.push(Question { id, text, kind, options });
    }

    Some(PendingQuestion::new(request_id, message_id, chat_id, questions))
}
