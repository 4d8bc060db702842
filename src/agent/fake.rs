//! Fake [`BotAgent`] for the lifecycle loops' own unit tests — lets
//! `restart`/`heartbeat`/`state_update` drive `tick()` against a registered
//! agent without spawning a real subprocess. Mirrors `tests/support/mod.rs`,
//! which plays the same role for the crate's black-box integration test.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::{BotAgent, OnMessage};
use crate::wire::Message;

struct FakeBotAgent {
    bot_gid: Uuid,
    alive: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Message>>>,
}

#[async_trait]
impl BotAgent for FakeBotAgent {
    async fn start(&mut self, _on_message: OnMessage) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_message(&self, msg: &Message) {
        self.sent.lock().await.push(msg.clone());
    }

    async fn is_alive(&mut self) -> bool {
        *self.alive.lock().await
    }

    async fn stop(&mut self) {
        *self.alive.lock().await = false;
    }

    fn bot_gid(&self) -> Uuid {
        self.bot_gid
    }
}

/// Handle to a registered [`FakeBotAgent`] for inspecting/driving it after
/// ownership of the boxed agent moved into the [`crate::agent::registry::AgentRegistry`].
pub(crate) struct FakeHandle {
    alive: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Message>>>,
}

impl FakeHandle {
    pub(crate) async fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    /// Simulate the child process dying (heartbeat loop's `¬is_alive` path).
    pub(crate) async fn kill(&self) {
        *self.alive.lock().await = false;
    }
}

pub(crate) fn fake_agent(bot_gid: Uuid) -> (Box<dyn BotAgent>, FakeHandle) {
    let alive = Arc::new(Mutex::new(true));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let agent = FakeBotAgent { bot_gid, alive: alive.clone(), sent: sent.clone() };
    let handle = FakeHandle { alive, sent };
    (Box::new(agent), handle)
}
