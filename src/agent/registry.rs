//! Agent registry (§4.3) — a mutex-guarded map of bot-id to agent.
//! The mutex is the only shared mutable collection in the supervisor (§5);
//! every add/remove/restart/list call takes it for its full duration.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::agent::{container::ContainerAgent, process::RawProcessAgent, BotAgent, OnMessage};
use crate::config::EngineConfig;
use crate::model::Bot;

/// Which launch strategy a newly constructed agent should use — selects
/// between the two [`BotAgent`] variants (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    Raw,
    Sandboxed,
}

impl RuntimeKind {
    pub fn from_config(config: &EngineConfig) -> Self {
        if config.agents.is_sandboxed() {
            RuntimeKind::Sandboxed
        } else {
            RuntimeKind::Raw
        }
    }
}

fn build_agent(bot: &Bot, kind: RuntimeKind, config: &EngineConfig) -> Box<dyn BotAgent> {
    let entry_point_path = config.agents.entry_point_path(&bot.entry_point);
    match kind {
        RuntimeKind::Raw => Box::new(RawProcessAgent::new(bot.gid, entry_point_path)),
        RuntimeKind::Sandboxed => {
            Box::new(ContainerAgent::new(bot.gid, config.agents.container_image.clone(), entry_point_path))
        }
    }
}

/// `HashMap<bot_gid, agent>` behind one asynchronous mutex (§4.3).
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<HashMap<Uuid, Box<dyn BotAgent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: Mutex::new(HashMap::new()) }
    }

    /// Insert a not-yet-started agent and start it. The lock is held across
    /// `start` so concurrent adds of the same bot serialize (§4.3).
    pub async fn add(&self, mut agent: Box<dyn BotAgent>, on_message: OnMessage) -> Result<()> {
        let gid = agent.bot_gid();
        let mut guard = self.agents.lock().await;
        if guard.contains_key(&gid) {
            return Err(anyhow!("agent for bot {gid} is already registered"));
        }
        agent.start(on_message).await?;
        guard.insert(gid, agent);
        Ok(())
    }

    /// Pop the agent for `bot_gid` and stop it, holding the lock for the
    /// full duration (§4.3 — "simplest implementation").
    pub async fn remove(&self, bot_gid: Uuid) {
        let mut guard = self.agents.lock().await;
        if let Some(mut agent) = guard.remove(&bot_gid) {
            agent.stop().await;
        }
    }

    /// Stop every registered agent concurrently — used on shutdown.
    pub async fn remove_all(&self) {
        let mut guard = self.agents.lock().await;
        let agents: Vec<_> = guard.drain().map(|(_, agent)| agent).collect();
        drop(guard);
        let stops = agents.into_iter().map(|mut agent| async move { agent.stop().await });
        join_all_stops(stops).await;
    }

    pub async fn is_registered(&self, bot_gid: Uuid) -> bool {
        self.agents.lock().await.contains_key(&bot_gid)
    }

    pub async fn is_alive(&self, bot_gid: Uuid) -> bool {
        let mut guard = self.agents.lock().await;
        match guard.get_mut(&bot_gid) {
            Some(agent) => agent.is_alive().await,
            None => false,
        }
    }

    pub async fn send_message(&self, bot_gid: Uuid, msg: &crate::wire::Message) {
        let guard = self.agents.lock().await;
        if let Some(agent) = guard.get(&bot_gid) {
            agent.send_message(msg).await;
        }
    }

    pub async fn list(&self) -> Vec<Uuid> {
        self.agents.lock().await.keys().copied().collect()
    }

    /// Remove any existing agent for `bot`, then construct and add a fresh
    /// one using the configured [`RuntimeKind`] (§4.3).
    pub async fn restart(&self, bot: &Bot, kind: RuntimeKind, config: &EngineConfig, on_message: OnMessage) -> Result<()> {
        self.remove(bot.gid).await;
        let agent = build_agent(bot, kind, config);
        self.add(agent, on_message).await
    }
}

/// Minimal concurrent-join helper so `remove_all` doesn't need to pull in a
/// `futures` dependency just for `join_all`.
async fn join_all_stops<I>(iter: I)
where
    I: IntoIterator,
    I::Item: std::future::Future<Output = ()>,
{
    let handles: Vec<_> = iter.into_iter().map(tokio::spawn).collect();
    for handle in handles {
        let _ = handle.await;
    }
}
