//! Restart loop (§4.4) — reconciles the desired set of bots (enabled ∧
//! (restart requested ∨ not registered)) against the agent registry, then
//! pushes an initial `state_sync` + `memory_download` before clearing
//! `restart_requested` (§9 Open Question: push before clearing).

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::registry::{AgentRegistry, RuntimeKind};
use crate::agent::OnMessage;
use crate::config::EngineConfig;
use crate::lifecycle::scheduler::FixedRateScheduler;
use crate::lifecycle::snapshot::{memory_download_payload, state_sync_payload};
use crate::model::MessageType;
use crate::state::Database;
use crate::wire::Message;

pub async fn run(
    db: Arc<Mutex<Database>>,
    registry: Arc<AgentRegistry>,
    config: Arc<EngineConfig>,
    on_message: OnMessage,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs_f64(config.lifecycle.restart.interval_secs.max(0.01));
    let mut scheduler = FixedRateScheduler::new(interval);
    let kind = RuntimeKind::from_config(&config);

    loop {
        tokio::select! {
            _ = scheduler.tick() => {
                tick(&db, &registry, &config, kind, on_message.clone()).await;
            }
            _ = cancel.cancelled() => {
                info!("restart loop stopping");
                return;
            }
        }
    }
}

async fn tick(
    db: &Arc<Mutex<Database>>,
    registry: &Arc<AgentRegistry>,
    config: &Arc<EngineConfig>,
    kind: RuntimeKind,
    on_message: OnMessage,
) {
    let bots = {
        let db = db.lock().await;
        match db.list_bots() {
            Ok(bots) => bots,
            Err(e) => {
                error!(error = %e, "restart loop: failed to list bots");
                return;
            }
        }
    };

    for bot in bots {
        if !bot.enabled {
            if registry.is_registered(bot.gid).await {
                registry.remove(bot.gid).await;
                info!(bot_gid = %bot.gid, "stopped disabled bot");
            }
            continue;
        }

        let needs_restart = bot.restart_requested || !registry.is_registered(bot.gid).await;
        if !needs_restart {
            continue;
        }

        if let Err(e) = registry.restart(&bot, kind, config, on_message.clone()).await {
            error!(bot_gid = %bot.gid, error = %e, "failed to restart agent");
            continue;
        }

        // Push initial context before clearing restart_requested/last_heartbeat
        // (§9 Open Question: setter-based semantics, push-before-clear).
        let snapshot = {
            let db = db.lock().await;
            let state_sync = state_sync_payload(&db, config, bot.gid);
            let memory = memory_download_payload(&db, bot.gid);
            (state_sync, memory)
        };
        if let (Some(state_sync_payload), memory_payload) = snapshot {
            let state_sync_msg = Message::new(bot.gid, MessageType::StateSync, state_sync_payload);
            registry.send_message(bot.gid, &state_sync_msg).await;

            let memory_msg = Message::new(bot.gid, MessageType::MemoryDownload, memory_payload);
            registry.send_message(bot.gid, &memory_msg).await;
        } else {
            warn!(bot_gid = %bot.gid, "could not build initial state snapshot after restart");
        }

        let now = Utc::now();
        let db = db.lock().await;
        if let Err(e) = db.finish_restart(bot.gid, now) {
            error!(bot_gid = %bot.gid, error = %e, "failed to persist restart bookkeeping");
        }
    }
}
