//! Message dispatcher (§4.5) — persists every message, then routes it by
//! type: service bookkeeping, structured log re-emission, or the command
//! router.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::agent::registry::AgentRegistry;
use crate::agent::OnMessage;
use crate::commands::{log_unmatched, Router};
use crate::model::MessageType;
use crate::state::Database;
use crate::wire::Message;

/// Owns the database and command router; one instance is shared (via
/// `Arc`) across every agent's reader tasks.
pub struct MessageDispatcher {
    db: Arc<Mutex<Database>>,
    router: Router,
    registry: Arc<AgentRegistry>,
}

impl MessageDispatcher {
    pub fn new(db: Arc<Mutex<Database>>, router: Router, registry: Arc<AgentRegistry>) -> Self {
        Self { db, router, registry }
    }

    /// Handle one inbound message (§4.5). Never panics or propagates an
    /// error upward — every failure path logs and returns.
    pub async fn dispatch(&self, message: Message) {
        let bot_gid = message.bot_id;

        {
            let db = self.db.lock().await;
            if let Err(e) = db.insert_message(&message) {
                error!(bot_gid = %bot_gid, error = %e, "failed to persist message");
            }
        }

        match message.message_type {
            MessageType::HeartbeatResponse => self.handle_heartbeat_response(bot_gid, &message).await,
            MessageType::BotLog => self.handle_bot_log(bot_gid, &message),
            MessageType::MemoryUpload => self.handle_memory_upload(bot_gid, &message).await,
            MessageType::Command => self.handle_command(bot_gid, &message).await,
            other => {
                warn!(bot_gid = %bot_gid, message_type = %other, "unhandled message type, ignoring");
            }
        }
    }

    async fn handle_heartbeat_response(&self, bot_gid: Uuid, message: &Message) {
        let db = self.db.lock().await;
        match db.get_bot(bot_gid) {
            Ok(Some(_)) => {
                if let Err(e) = db.set_last_heartbeat(bot_gid, message.datetime) {
                    error!(bot_gid = %bot_gid, error = %e, "failed to persist heartbeat");
                }
            }
            Ok(None) => warn!(bot_gid = %bot_gid, "heartbeat_response from unknown bot"),
            Err(e) => error!(bot_gid = %bot_gid, error = %e, "failed to load bot for heartbeat"),
        }
    }

    fn handle_bot_log(&self, bot_gid: Uuid, message: &Message) {
        let level = message.payload.get("level").and_then(|v| v.as_str()).unwrap_or("debug").to_ascii_lowercase();
        let text = message.payload.get("message").and_then(|v| v.as_str()).unwrap_or("");
        match level.as_str() {
            "error" => error!(bot_gid = %bot_gid, "{text}"),
            "warn" | "warning" => warn!(bot_gid = %bot_gid, "{text}"),
            "info" => info!(bot_gid = %bot_gid, "{text}"),
            "trace" => trace!(bot_gid = %bot_gid, "{text}"),
            _ => debug!(bot_gid = %bot_gid, "{text}"),
        }
    }

    async fn handle_memory_upload(&self, bot_gid: Uuid, message: &Message) {
        let data = message.payload.get("data").cloned().unwrap_or(serde_json::Value::Null);
        let db = self.db.lock().await;
        if let Err(e) = db.upsert_memory(bot_gid, data, message.datetime) {
            error!(bot_gid = %bot_gid, error = %e, "failed to persist memory upload");
        }
    }

    async fn handle_command(&self, bot_gid: Uuid, message: &Message) {
        let result = {
            let mut db = self.db.lock().await;
            self.router.dispatch(&mut db, bot_gid, message)
        };
        let Some(payload) = result else {
            log_unmatched(bot_gid, message);
            return;
        };
        let reply = Message::reply_to(message, MessageType::CommandResult, payload);
        self.registry.send_message(bot_gid, &reply).await;
    }

    /// Drain `rx` and dispatch each message in the order it arrives. Every
    /// agent's reader tasks feed the same channel through [`on_message`], so
    /// this single consumer is what gives "inbound messages are processed
    /// in the order read from stdout" (§5) its teeth — stronger, in fact,
    /// than the per-agent guarantee the spec requires, but never weaker.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some(msg) => self.dispatch(msg).await,
                        None => {
                            info!("message channel closed, dispatcher stopping");
                            return;
                        }
                    }
                }
                _ = cancel.cancelled() => {
                    info!("dispatcher stopping");
                    return;
                }
            }
        }
    }
}

/// Build an [`OnMessage`] callback that enqueues onto `tx`. Cloned into
/// every agent a given supervisor run spawns.
pub fn on_message(tx: mpsc::UnboundedSender<Message>) -> OnMessage {
    Arc::new(move |msg| {
        if tx.send(msg).is_err() {
            warn!("message dispatch channel closed, dropping message");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::root_router;
    use crate::config::EngineConfig;
    use crate::model::TerrainType;

    fn make_dispatcher() -> (MessageDispatcher, Arc<Mutex<Database>>) {
        let db = Database::open_in_memory().unwrap();
        let db = Arc::new(Mutex::new(db));
        let router = root_router(EngineConfig::default());
        let registry = Arc::new(AgentRegistry::new());
        (MessageDispatcher::new(db.clone(), router, registry), db)
    }

    #[tokio::test]
    async fn unknown_command_is_persisted_but_not_routed() {
        let (dispatcher, db) = make_dispatcher();
        let user = db.lock().await.create_user(1).unwrap();
        let bot = db.lock().await.create_bot(user.gid, "b", "bots/b.py").unwrap();

        let msg = Message::new(bot.gid, MessageType::Command, serde_json::json!({"command": "teleport"}));
        dispatcher.dispatch(msg).await;
        // no panic, nothing to assert on besides "didn't crash" — persistence
        // is covered by state::database's own tests.
    }

    #[tokio::test]
    async fn heartbeat_response_updates_last_heartbeat() {
        let (dispatcher, db) = make_dispatcher();
        let user = db.lock().await.create_user(1).unwrap();
        let bot = db.lock().await.create_bot(user.gid, "b", "bots/b.py").unwrap();

        let msg = Message::new(bot.gid, MessageType::HeartbeatResponse, serde_json::json!({}));
        let sent_at = msg.datetime;
        dispatcher.dispatch(msg).await;

        let reloaded = db.lock().await.get_bot(bot.gid).unwrap().unwrap();
        assert_eq!(reloaded.last_heartbeat, Some(sent_at));
    }

    #[tokio::test]
    async fn memory_upload_persists_payload() {
        let (dispatcher, db) = make_dispatcher();
        let user = db.lock().await.create_user(1).unwrap();
        let bot = db.lock().await.create_bot(user.gid, "b", "bots/b.py").unwrap();

        let msg = Message::new(bot.gid, MessageType::MemoryUpload, serde_json::json!({"data": {"score": 7}}));
        dispatcher.dispatch(msg).await;

        let mem = db.lock().await.get_memory(bot.gid).unwrap().unwrap();
        assert_eq!(mem.data["score"], 7);
    }

    #[tokio::test]
    async fn terrain_is_seeded_for_move_tests() {
        let (_dispatcher, db) = make_dispatcher();
        let loc = db.lock().await.create_location(0, 0, TerrainType::Plains).unwrap();
        assert_eq!(loc.terrain, TerrainType::Plains);
    }
}
