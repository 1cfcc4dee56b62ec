//! `lanebridge` binary (SPEC_FULL §A "bin/lanebridge", §E "Ambient
//! stack"): CLI parsing, tracing init, config load, `Gateway` bootstrap,
//! and a terminal read loop that feeds the Gateway one line at a time.
//!
//! Grounded on the teacher's `bin_telegram::main` (`#[tokio::main] async
//! fn main() -> Result<()>`, CLI via `clap::Parser`, `tracing_subscriber`
//! init, config loaded from a path, then a concrete bot built and run).
//! The messaging platform client and agent backend RPC client are named,
//! out-of-scope external collaborators (spec §1); this binary wires the
//! built-in terminal `Channel`/`Agent` pair (`stdio` module) in their
//! place so the pipeline can be exercised end to end without either.

mod stdio;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use lanebridge_config::{Cli, GatewayConfig, JsonFilePersistStore, PersistStore, PersistedGroup, PersistedSession, PersistedState};
use lanebridge_core::binding::MessageContext;
use lanebridge_core::session_key::SessionKey;
use lanebridge_gateway::Gateway;
use lanebridge_session::SessionGroupInfo;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = GatewayConfig::from_file(&cli.config_file).context("loading gateway config")?;
    config.from_env_overrides();
    let log_level = cli.log_level.clone().unwrap_or_else(|| config.log_level.clone());

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_new(&log_level).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let agent: Arc<dyn lanebridge_core::traits::Agent> = stdio::build_agent(config.default_agent_id.clone());

    if cli.list_models {
        for model in agent.list_models().await? {
            println!("{}\t{}\t{}", model.id, model.name, model.provider_id);
        }
        return Ok(());
    }

    let project_path = cli.project.clone().unwrap_or_else(|| ".".to_string());
    let gateway = Arc::new(
        Gateway::from_config(&config, agent)
            .map_err(|err| anyhow::anyhow!("invalid bindings in config: {err}"))?
            .with_default_project_path(project_path.clone()),
    );
    gateway.register_channel(stdio::build_channel());

    let persist_store = config.persist_path.as_ref().map(|path| JsonFilePersistStore::new(path.clone()));
    if let Some(store) = &persist_store {
        restore_state(&gateway, store)?;
    }

    gateway.start();
    tracing::info!(default_agent = %config.default_agent_id, "lanebridge gateway started");

    // `--model` overrides the model used for this run (spec §6). The
    // stdin loop always processes on the same `(stdio, local)` session
    // key, so pre-creating that session here with the override applied
    // means every prompt in the run carries it — `get_or_create_session`
    // just refreshes `lastActiveAt` on the sessions handle_message later
    // resolves (spec §4.3 "if present, refresh ... return").
    if let Some(model) = cli.model.as_deref() {
        let key = SessionKey::chat(stdio::CHANNEL_ID.to_string(), "local".to_string())?;
        gateway.session_manager().get_or_create_session(&key, &project_path, Some(model)).await?;
    }

    run_stdin_loop(&gateway).await?;

    gateway.stop();
    if let Some(store) = &persist_store {
        save_state(&gateway, store)?;
    }
    tracing::info!("lanebridge gateway stopped");
    Ok(())
}

/// Reads one message per line from stdin until EOF, feeding each into the
/// Gateway on a single `(stdio, local)` chat from a single `local` user
/// (spec §4.7 "installs a message handler"). `/quit` exits the loop early.
async fn run_stdin_loop(gateway: &Arc<Gateway>) -> anyhow::Result<()> {
    println!("lanebridge ready — type a message and press enter (/quit to exit)");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "/quit" {
            break;
        }

        let ctx = MessageContext {
            channel_id: stdio::CHANNEL_ID.to_string(),
            channel_type: stdio::CHANNEL_ID.to_string(),
            chat_type: "dm".to_string(),
            chat_id: "local".to_string(),
            user_id: "local".to_string(),
            message_text: text.to_string(),
        };
        let user_message_id = format!("stdin-{}", uuid::Uuid::new_v4());
        if let Err(err) = gateway.handle_message(ctx, user_message_id).await {
            tracing::warn!(error = %err, "failed to handle stdin message");
        }
    }
    Ok(())
}

fn restore_state(gateway: &Gateway, store: &JsonFilePersistStore) -> anyhow::Result<()> {
    let state = store.load().context("loading persisted state")?;
    let sessions = gateway.session_manager();
    for persisted in state.sessions {
        sessions.restore_session(persisted.state);
    }
    for group in state.groups {
        sessions.restore_group(group_from_value(group));
    }
    Ok(())
}

fn save_state(gateway: &Gateway, store: &JsonFilePersistStore) -> anyhow::Result<()> {
    let sessions = gateway.session_manager();
    let state = PersistedState {
        sessions: sessions
            .snapshot_sessions()
            .into_iter()
            .map(|state| PersistedSession { key: state.key.to_string(), state })
            .collect(),
        groups: sessions.snapshot_groups().into_iter().map(group_to_value).collect(),
    };
    store.save(&state).context("saving persisted state")
}

fn group_to_value(info: SessionGroupInfo) -> PersistedGroup {
    PersistedGroup {
        chat_id: info.chat_id.clone(),
        info: serde_json::json!({
            "chatId": info.chat_id,
            "memberIds": info.member_ids.into_iter().collect::<Vec<_>>(),
            "title": info.title,
        }),
    }
}

fn group_from_value(persisted: PersistedGroup) -> SessionGroupInfo {
    let member_ids = persisted
        .info
        .get("memberIds")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let title = persisted.info.get("title").and_then(|v| v.as_str()).map(str::to_string);
    SessionGroupInfo { chat_id: persisted.chat_id, member_ids, title }
}
