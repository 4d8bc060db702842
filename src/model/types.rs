//! Enumerations shared across the model, wire protocol, and config.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Terrain tag of a [`Location`](super::Location). Determines per-step
/// movement cost; injected via config rather than self-looked-up so the
/// model stays a pure function of stored columns plus config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainType {
    Plains,
    Forest,
    Swamp,
}

impl fmt::Display for TerrainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plains => write!(f, "plains"),
            Self::Forest => write!(f, "forest"),
            Self::Swamp => write!(f, "swamp"),
        }
    }
}

impl FromStr for TerrainType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plains" => Ok(Self::Plains),
            "forest" => Ok(Self::Forest),
            "swamp" => Ok(Self::Swamp),
            other => Err(format!("unknown terrain type: {other}")),
        }
    }
}

/// Type of a [`Unit`](super::Unit) within an army.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitType {
    LightInfantry,
    HeavyInfantry,
    Spearmen,
    LightCavalry,
    HeavyCavalry,
    Archer,
    Crossbowman,
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LightInfantry => "light_infantry",
            Self::HeavyInfantry => "heavy_infantry",
            Self::Spearmen => "spearmen",
            Self::LightCavalry => "light_cavalry",
            Self::HeavyCavalry => "heavy_cavalry",
            Self::Archer => "archer",
            Self::Crossbowman => "crossbowman",
        };
        write!(f, "{s}")
    }
}

impl FromStr for UnitType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light_infantry" => Ok(Self::LightInfantry),
            "heavy_infantry" => Ok(Self::HeavyInfantry),
            "spearmen" => Ok(Self::Spearmen),
            "light_cavalry" => Ok(Self::LightCavalry),
            "heavy_cavalry" => Ok(Self::HeavyCavalry),
            "archer" => Ok(Self::Archer),
            "crossbowman" => Ok(Self::Crossbowman),
            other => Err(format!("unknown unit type: {other}")),
        }
    }
}

impl UnitType {
    /// All known unit types, for config validation and defaults.
    pub const ALL: [UnitType; 7] = [
        UnitType::LightInfantry,
        UnitType::HeavyInfantry,
        UnitType::Spearmen,
        UnitType::LightCavalry,
        UnitType::HeavyCavalry,
        UnitType::Archer,
        UnitType::Crossbowman,
    ];
}

/// Derived runtime state of a [`Bot`](super::Bot). Never stored; computed
/// from `enabled`, `restart_requested`, and `last_heartbeat` plus the
/// configured heartbeat timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotState {
    Disabled,
    Starting,
    Restarting,
    Unresponsive,
    Running,
}

impl fmt::Display for BotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disabled => "disabled",
            Self::Starting => "starting",
            Self::Restarting => "restarting",
            Self::Unresponsive => "unresponsive",
            Self::Running => "running",
        };
        write!(f, "{s}")
    }
}

/// Wire message type tag (§4.1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HeartbeatRequest,
    HeartbeatResponse,
    BotLog,
    StateSync,
    MemoryDownload,
    MemoryUpload,
    Command,
    CommandResult,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HeartbeatRequest => "heartbeat_request",
            Self::HeartbeatResponse => "heartbeat_response",
            Self::BotLog => "bot_log",
            Self::StateSync => "state_sync",
            Self::MemoryDownload => "memory_download",
            Self::MemoryUpload => "memory_upload",
            Self::Command => "command",
            Self::CommandResult => "command_result",
        };
        write!(f, "{s}")
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heartbeat_request" => Ok(Self::HeartbeatRequest),
            "heartbeat_response" => Ok(Self::HeartbeatResponse),
            "bot_log" => Ok(Self::BotLog),
            "state_sync" => Ok(Self::StateSync),
            "memory_download" => Ok(Self::MemoryDownload),
            "memory_upload" => Ok(Self::MemoryUpload),
            "command" => Ok(Self::Command),
            "command_result" => Ok(Self::CommandResult),
            other => Err(format!("unknown message type: {other}")),
        }
    }
}
