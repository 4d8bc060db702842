//! Fake [`BotAgent`] — stands in for a real child process in integration
//! tests so the dispatcher/registry/router can be exercised end to end
//! without spawning anything (spec's "fake pipe pair" guidance, §9).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use botengine::agent::{BotAgent, OnMessage};
use botengine::wire::Message;

struct FakeBotAgent {
    bot_gid: Uuid,
    alive: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Message>>>,
    on_message: Arc<Mutex<Option<OnMessage>>>,
}

#[async_trait]
impl BotAgent for FakeBotAgent {
    async fn start(&mut self, on_message: OnMessage) -> anyhow::Result<()> {
        *self.on_message.lock().await = Some(on_message);
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

/// Handle to a registered [`FakeBotAgent`] — lets a test inspect what the
/// registry wrote to its "stdin" and simulate inbound "stdout" lines, after
/// ownership of the boxed agent itself has moved into the registry.
pub struct FakeHandle {
    alive: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Message>>>,
    on_message: Arc<Mutex<Option<OnMessage>>>,
}

impl FakeHandle {
    /// Messages the registry/lifecycle loops sent to this agent, in order.
    pub async fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().await.clone()
    }

    /// Flip whether `is_alive()` reports true, simulating a process death.
    pub async fn set_alive(&self, alive: bool) {
        *self.alive.lock().await = alive;
    }

    /// Simulate the bot process emitting `msg` on its stdout — feeds it to
    /// whatever `on_message` the registry installed via `start()`.
    pub async fn deliver(&self, msg: Message) {
        let cb = self.on_message.lock().await.clone();
        if let Some(cb) = cb {
            cb(msg);
        } else {
            panic!("deliver() called before the agent was started");
        }
    }
}

/// Build a not-yet-registered fake agent plus the handle used to drive it.
pub fn fake_agent(bot_gid: Uuid) -> (Box<dyn BotAgent>, FakeHandle) {
    let alive = Arc::new(Mutex::new(true));
    let sent = Arc::new(Mutex::new(Vec::new()));
    let on_message = Arc::new(Mutex::new(None));

    let agent = FakeBotAgent { bot_gid, alive: alive.clone(), sent: sent.clone(), on_message: on_message.clone() };
    let handle = FakeHandle { alive, sent, on_message };
    (Box::new(agent), handle)
}
