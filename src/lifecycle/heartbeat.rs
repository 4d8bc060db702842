//! Heartbeat loop (§4.4) — probes each registered agent's liveness and
//! removes it if the process died or went unresponsive.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::agent::registry::AgentRegistry;
use crate::config::EngineConfig;
use crate::lifecycle::scheduler::FixedRateScheduler;
use crate::model::MessageType;
use crate::state::Database;
use crate::wire::Message;

pub async fn run(
    db: Arc<Mutex<Database>>,
    registry: Arc<AgentRegistry>,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs_f64(config.lifecycle.heartbeat.interval_secs.max(0.01));
    let mut scheduler = FixedRateScheduler::new(interval);

    loop {
        tokio::select! {
            _ = scheduler.tick() => {
                tick(&db, &registry, &config).await;
            }
            _ = cancel.cancelled() => {
                info!("heartbeat loop stopping");
                return;
            }
        }
    }
}

async fn tick(db: &Arc<Mutex<Database>>, registry: &Arc<AgentRegistry>, config: &Arc<EngineConfig>) {
    let registered = registry.list().await;
    let timeout = config.lifecycle.heartbeat.timeout_secs;

    for bot_gid in registered {
        if !registry.is_alive(bot_gid).await {
            warn!(bot_gid = %bot_gid, "agent process died, removing");
            registry.remove(bot_gid).await;
            continue;
        }

        let last_heartbeat = {
            let db = db.lock().await;
            match db.get_bot(bot_gid) {
                Ok(Some(bot)) => bot.last_heartbeat,
                Ok(None) => {
                    error!(bot_gid = %bot_gid, "registered agent has no bot row, removing");
                    registry.remove(bot_gid).await;
                    continue;
                }
                Err(e) => {
                    error!(bot_gid = %bot_gid, error = %e, "failed to load bot for heartbeat check");
                    continue;
                }
            }
        };

        let age_secs = last_heartbeat.map(|hb| (Utc::now() - hb).num_milliseconds() as f64 / 1000.0);
        if age_secs.is_some_and(|age| age > timeout) {
            warn!(bot_gid = %bot_gid, "agent unresponsive, removing");
            registry.remove(bot_gid).await;
            continue;
        }

        let request = Message::new(bot_gid, MessageType::HeartbeatRequest, serde_json::json!({}));
        registry.send_message(bot_gid, &request).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::fake::fake_agent;
    use chrono::Duration as ChronoDuration;

    fn noop_on_message() -> crate::agent::OnMessage {
        Arc::new(|_| {})
    }

    async fn registered_bot(db: &Database, registry: &AgentRegistry) -> uuid::Uuid {
        let user = db.create_user(1).unwrap();
        let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
        let (agent, _handle) = fake_agent(bot.gid);
        registry.add(agent, noop_on_message()).await.unwrap();
        bot.gid
    }

    /// spec.md §8 scenario #2: a heartbeat older than `timeout` removes the
    /// agent from the registry on the next sweep.
    #[tokio::test]
    async fn unresponsive_bot_is_removed_on_timeout() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(AgentRegistry::new());
        let config = Arc::new(EngineConfig::default());

        let bot_gid = {
            let db = db.lock().await;
            let gid = registered_bot(&db, &registry).await;
            db.set_last_heartbeat(gid, Utc::now() - ChronoDuration::seconds(4)).unwrap();
            gid
        };

        tick(&db, &registry, &config).await;

        assert!(!registry.is_registered(bot_gid).await);
    }

    #[tokio::test]
    async fn dead_process_is_removed_even_within_timeout() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(AgentRegistry::new());
        let config = Arc::new(EngineConfig::default());

        let (bot_gid, handle) = {
            let db = db.lock().await;
            let user = db.create_user(1).unwrap();
            let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
            let (agent, handle) = fake_agent(bot.gid);
            registry.add(agent, noop_on_message()).await.unwrap();
            db.set_last_heartbeat(bot.gid, Utc::now()).unwrap();
            (bot.gid, handle)
        };
        handle.kill().await;

        tick(&db, &registry, &config).await;

        assert!(!registry.is_registered(bot_gid).await);
    }

    #[tokio::test]
    async fn healthy_bot_receives_a_heartbeat_request() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(AgentRegistry::new());
        let config = Arc::new(EngineConfig::default());

        let (bot_gid, handle) = {
            let db = db.lock().await;
            let user = db.create_user(1).unwrap();
            let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
            let (agent, handle) = fake_agent(bot.gid);
            registry.add(agent, noop_on_message()).await.unwrap();
            db.set_last_heartbeat(bot.gid, Utc::now()).unwrap();
            (bot.gid, handle)
        };

        tick(&db, &registry, &config).await;

        assert!(registry.is_registered(bot_gid).await);
        let sent = handle.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::HeartbeatRequest);
    }
}
