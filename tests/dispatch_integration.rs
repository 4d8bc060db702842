//! End-to-end dispatcher + router integration, against an in-memory
//! database and a fake agent instead of a real subprocess (§10).

mod support;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use botengine::agent::registry::AgentRegistry;
use botengine::commands::root_router;
use botengine::config::EngineConfig;
use botengine::dispatch::{self, MessageDispatcher};
use botengine::model::{MessageType, TerrainType};
use botengine::state::Database;
use botengine::wire::Message;

#[tokio::test]
async fn command_round_trip_through_dispatcher_and_router() {
    let db = Database::open_in_memory().unwrap();
    let user = db.create_user(10).unwrap();
    let bot = db.create_bot(user.gid, "scout", "bots/scout.py").unwrap();
    let origin = db.create_location(0, 0, TerrainType::Plains).unwrap();
    db.create_location(9, 9, TerrainType::Plains).unwrap();
    let army = db.create_army(bot.gid, origin.gid).unwrap();

    let db = Arc::new(Mutex::new(db));
    let registry = Arc::new(AgentRegistry::new());
    let router = root_router(EngineConfig::default());
    let dispatcher = Arc::new(MessageDispatcher::new(db.clone(), router, registry.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let on_message = dispatch::on_message(tx);

    let (agent, handle) = support::fake_agent(bot.gid);
    registry.add(agent, on_message).await.unwrap();

    let cancel = CancellationToken::new();
    let dispatcher_task = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(rx, cancel).await })
    };

    // (9, 9) is far from the army's (0, 0) origin, so `move` is rejected on
    // the adjacency check — exercises the full inbound path without needing
    // to seed units.
    let command_msg = Message::new(
        bot.gid,
        MessageType::Command,
        serde_json::json!({"command": "move", "army_gid": army.gid, "location": {"x": 9, "y": 9}}),
    );
    handle.deliver(command_msg.clone()).await;

    // Give the single-consumer loop a chance to drain and reply.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sent = handle.sent_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].message_type, MessageType::CommandResult);
    assert_eq!(sent[0].response_to, Some(command_msg.gid));
    assert_eq!(sent[0].payload["status"], "error");
    assert_eq!(sent[0].payload["reason"], "Destination not adjacent");

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), dispatcher_task).await;
}

#[tokio::test]
async fn unknown_command_gets_no_reply_but_does_not_crash_the_dispatcher() {
    let db = Database::open_in_memory().unwrap();
    let user = db.create_user(10).unwrap();
    let bot = db.create_bot(user.gid, "scout", "bots/scout.py").unwrap();

    let db = Arc::new(Mutex::new(db));
    let registry = Arc::new(AgentRegistry::new());
    let router = root_router(EngineConfig::default());
    let dispatcher = Arc::new(MessageDispatcher::new(db.clone(), router, registry.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let on_message = dispatch::on_message(tx);
    let (agent, handle) = support::fake_agent(bot.gid);
    registry.add(agent, on_message).await.unwrap();

    let cancel = CancellationToken::new();
    let dispatcher_task = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(rx, cancel).await })
    };

    let command_msg = Message::new(bot.gid, MessageType::Command, serde_json::json!({"command": "teleport"}));
    handle.deliver(command_msg).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(handle.sent_messages().await.is_empty());

    // The dispatcher is still alive and will answer a recognized command
    // sent right after the unmatched one.
    let army_cmd =
        Message::new(bot.gid, MessageType::Command, serde_json::json!({"command": "merge", "armies": [bot.gid]}));
    handle.deliver(army_cmd).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.sent_messages().await.len(), 1);

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), dispatcher_task).await;
}

#[tokio::test]
async fn heartbeat_response_is_persisted_through_the_dispatcher() {
    let db = Database::open_in_memory().unwrap();
    let user = db.create_user(10).unwrap();
    let bot = db.create_bot(user.gid, "scout", "bots/scout.py").unwrap();

    let db = Arc::new(Mutex::new(db));
    let registry = Arc::new(AgentRegistry::new());
    let router = root_router(EngineConfig::default());
    let dispatcher = Arc::new(MessageDispatcher::new(db.clone(), router, registry.clone()));

    let (tx, rx) = mpsc::unbounded_channel();
    let on_message = dispatch::on_message(tx);
    let (agent, handle) = support::fake_agent(bot.gid);
    registry.add(agent, on_message).await.unwrap();

    let cancel = CancellationToken::new();
    let dispatcher_task = {
        let dispatcher = dispatcher.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(rx, cancel).await })
    };

    let heartbeat_msg = Message::new(bot.gid, MessageType::HeartbeatResponse, serde_json::json!({}));
    let sent_at = heartbeat_msg.datetime;
    handle.deliver(heartbeat_msg).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let reloaded = db.lock().await.get_bot(bot.gid).unwrap().unwrap();
    assert_eq!(reloaded.last_heartbeat, Some(sent_at));

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), dispatcher_task).await;
}

#[tokio::test]
async fn dead_agent_is_detected_by_is_alive() {
    let db = Database::open_in_memory().unwrap();
    let user = db.create_user(10).unwrap();
    let bot = db.create_bot(user.gid, "scout", "bots/scout.py").unwrap();

    let registry = Arc::new(AgentRegistry::new());
    let (tx, _rx) = mpsc::unbounded_channel();
    let on_message = dispatch::on_message(tx);

    let (agent, handle) = support::fake_agent(bot.gid);
    registry.add(agent, on_message).await.unwrap();
    assert!(registry.is_alive(bot.gid).await);

    handle.set_alive(false).await;
    assert!(!registry.is_alive(bot.gid).await);

    registry.remove(bot.gid).await;
    assert!(!registry.is_registered(bot.gid).await);
}
