//! State-update loop (§4.4) — periodically pushes a `state_sync` snapshot
//! to every registered agent.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::agent::registry::AgentRegistry;
use crate::config::EngineConfig;
use crate::lifecycle::scheduler::FixedRateScheduler;
use crate::lifecycle::snapshot::state_sync_payload;
use crate::model::MessageType;
use crate::state::Database;
use crate::wire::Message;

pub async fn run(
    db: Arc<Mutex<Database>>,
    registry: Arc<AgentRegistry>,
    config: Arc<EngineConfig>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_secs_f64(config.lifecycle.state_update.interval_secs.max(0.01));
    let mut scheduler = FixedRateScheduler::new(interval);

    loop {
        tokio::select! {
            _ = scheduler.tick() => {
                tick(&db, &registry, &config).await;
            }
            _ = cancel.cancelled() => {
                info!("state-update loop stopping");
                return;
            }
        }
    }
}

async fn tick(db: &Arc<Mutex<Database>>, registry: &Arc<AgentRegistry>, config: &Arc<EngineConfig>) {
    for bot_gid in registry.list().await {
        let payload = {
            let db = db.lock().await;
            state_sync_payload(&db, config, bot_gid)
        };
        match payload {
            Some(payload) => {
                let msg = Message::new(bot_gid, MessageType::StateSync, payload);
                registry.send_message(bot_gid, &msg).await;
            }
            None => warn!(bot_gid = %bot_gid, "could not build state_sync snapshot, skipping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::fake::fake_agent;
    use crate::model::TerrainType;

    fn noop_on_message() -> crate::agent::OnMessage {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn registered_bot_receives_a_state_sync_with_its_armies() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(AgentRegistry::new());
        let config = Arc::new(EngineConfig::default());

        let (bot_gid, handle) = {
            let db = db.lock().await;
            let user = db.create_user(1).unwrap();
            let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
            let loc = db.create_location(0, 0, TerrainType::Plains).unwrap();
            db.create_army(bot.gid, loc.gid).unwrap();
            let (agent, handle) = fake_agent(bot.gid);
            registry.add(agent, noop_on_message()).await.unwrap();
            (bot.gid, handle)
        };

        tick(&db, &registry, &config).await;

        let sent = handle.sent_messages().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message_type, MessageType::StateSync);
        assert_eq!(sent[0].payload["me"]["gid"], bot_gid.to_string());
        assert_eq!(sent[0].payload["me"]["armies"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unregistered_bot_receives_nothing() {
        let db = Arc::new(Mutex::new(Database::open_in_memory().unwrap()));
        let registry = Arc::new(AgentRegistry::new());
        let config = Arc::new(EngineConfig::default());

        tick(&db, &registry, &config).await;

        assert!(registry.list().await.is_empty());
    }
}
