//! Sandboxed container agent (§4.2) — launches the bot inside a container
//! with no network, capped CPU/memory, and every capability dropped. The
//! bot's source tree is mounted read-only; the supervisor assumes the bot
//! is hostile (§5 "Isolation").

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;
use uuid::Uuid;

use crate::agent::{BotAgent, OnMessage, ProcessSkeleton};

/// CPU share cap for a sandboxed bot (§4.2, §5): `--cpus 0.5`.
pub const CPU_LIMIT: &str = "0.5";
/// Memory cap for a sandboxed bot: `--memory 250m`.
pub const MEMORY_LIMIT: &str = "250m";

pub struct ContainerAgent {
    container_name: String,
    image: String,
    entry_point_path: String,
    skeleton: ProcessSkeleton,
}

impl ContainerAgent {
    /// Container name is deterministic: `agent-<bot_gid>` (§4.2).
    pub fn new(bot_gid: Uuid, image: String, entry_point_path: String) -> Self {
        Self {
            container_name: format!("agent-{bot_gid}"),
            image,
            entry_point_path,
            skeleton: ProcessSkeleton::new(bot_gid),
        }
    }

    fn docker_run_command(&self) -> Command {
        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "-i",
            "--name",
            &self.container_name,
            "--network",
            "none",
            "--cpus",
            CPU_LIMIT,
            "--memory",
            MEMORY_LIMIT,
            "--cap-drop",
            "ALL",
            "-v",
        ])
        .arg(format!("{}:/bot:ro", self.entry_point_path))
        .arg(&self.image);
        cmd
    }
}

#[async_trait]
impl BotAgent for ContainerAgent {
    async fn start(&mut self, on_message: OnMessage) -> anyhow::Result<()> {
        let command = self.docker_run_command();
        self.skeleton.spawn(command, on_message).await
    }

    async fn send_message(&self, msg: &crate::wire::Message) {
        self.skeleton.send_message(msg).await
    }

    async fn is_alive(&mut self) -> bool {
        self.skeleton.is_alive().await
    }

    async fn stop(&mut self) {
        self.skeleton.stop().await;
        // The base skeleton's grace-period/kill sequence stops the process
        // tokio is tracking (`docker run`'s own PID); the container itself
        // may outlive that if docker detached it, so remove it by name too.
        let output = tokio::process::Command::new("docker")
            .args(["rm", "-f", &self.container_name])
            .output()
            .await;
        if let Err(e) = output {
            warn!(container = %self.container_name, error = %e, "failed to remove sandbox container");
        }
    }

    fn bot_gid(&self) -> Uuid {
        self.skeleton.bot_gid()
    }
}
