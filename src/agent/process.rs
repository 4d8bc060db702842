//! Raw process agent (§4.2) — launches the bot's entry point directly.
//! Used in development; no isolation beyond the OS process boundary.

use async_trait::async_trait;
use tokio::process::Command;
use uuid::Uuid;

use crate::agent::{BotAgent, OnMessage, ProcessSkeleton};

pub struct RawProcessAgent {
    entry_point_path: String,
    skeleton: ProcessSkeleton,
}

impl RawProcessAgent {
    pub fn new(bot_gid: Uuid, entry_point_path: String) -> Self {
        Self { entry_point_path, skeleton: ProcessSkeleton::new(bot_gid) }
    }
}

#[async_trait]
impl BotAgent for RawProcessAgent {
    async fn start(&mut self, on_message: OnMessage) -> anyhow::Result<()> {
        let command = Command::new(&self.entry_point_path);
        self.skeleton.spawn(command, on_message).await
    }

    async fn send_message(&self, msg: &crate::wire::Message) {
        self.skeleton.send_message(msg).await
    }

    async fn is_alive(&mut self) -> bool {
        self.skeleton.is_alive().await
    }

    async fn stop(&mut self) {
        self.skeleton.stop().await
    }

    fn bot_gid(&self) -> Uuid {
        self.skeleton.bot_gid()
    }
}
