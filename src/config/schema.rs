//! Configuration schema for botengine.toml.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::{TerrainType, UnitType};

/// Root configuration structure.
///
/// `units` and `terrain` are keyed by the string form of their enum (e.g.
/// `"archer"`, `"forest"`) rather than the enum itself — TOML table keys
/// must be strings, so the lookup goes through `Display`/`FromStr` instead
/// of asking serde to serialize an enum as a map key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub agents: AgentsConfig,
    pub lifecycle: LifecycleConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub units: HashMap<String, UnitConfig>,
    pub terrain: HashMap<String, TerrainConfig>,
    pub generators: GeneratorsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut units = HashMap::new();
        for unit_type in UnitType::ALL {
            units.insert(unit_type.to_string(), UnitConfig::default());
        }

        let mut terrain = HashMap::new();
        terrain.insert(TerrainType::Plains.to_string(), TerrainConfig { movement_cost: 0.1 });
        terrain.insert(TerrainType::Forest.to_string(), TerrainConfig { movement_cost: 0.2 });
        terrain.insert(TerrainType::Swamp.to_string(), TerrainConfig { movement_cost: 0.3 });

        Self {
            agents: AgentsConfig::default(),
            lifecycle: LifecycleConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            units,
            terrain,
            generators: GeneratorsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Resolve a path that may contain `~` to an absolute path.
    pub fn resolve_path(&self, path: &str) -> String {
        shellexpand::tilde(path).into_owned()
    }

    pub fn resolved_db_path(&self) -> String {
        self.resolve_path(&self.database.path)
    }

    pub fn resolved_base_dir(&self) -> String {
        self.resolve_path(&self.agents.base_dir)
    }

    /// Movement cost for a location's terrain, falling back to 1.0 for a
    /// terrain type missing from config (never block movement on a config gap).
    pub fn movement_cost(&self, terrain: TerrainType) -> f64 {
        self.terrain.get(&terrain.to_string()).map(|t| t.movement_cost).unwrap_or(1.0)
    }

    /// Stamina recovery rate per second for a unit type, falling back to 0.0.
    pub fn stamina_recovery(&self, unit_type: UnitType) -> f64 {
        self.units.get(&unit_type.to_string()).map(|u| u.stamina_recovery).unwrap_or(0.0)
    }
}

/// How bot subprocesses are launched and supervised.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Directory containing each bot's entry point script, keyed by bot name.
    pub base_dir: String,

    /// Launch strategy selector: `"raw"` or `"sandboxed"` (§6).
    pub runtime_class: String,

    /// Container image used when `runtime_class = "sandboxed"`.
    pub container_image: String,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/.botengine/bots".into(),
            runtime_class: "raw".into(),
            container_image: "botengine/sandbox:latest".into(),
        }
    }
}

impl AgentsConfig {
    pub fn entry_point_path(&self, entry_point: &str) -> String {
        format!("{}/{}", shellexpand::tilde(&self.base_dir), entry_point)
    }

    pub fn is_sandboxed(&self) -> bool {
        self.runtime_class.eq_ignore_ascii_case("sandboxed")
    }
}

/// Fixed-rate intervals for the three lifecycle loops (§4.4, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub restart: RestartConfig,
    pub heartbeat: HeartbeatConfig,
    pub state_update: StateUpdateConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            restart: RestartConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            state_update: StateUpdateConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    #[serde(rename = "interval")]
    pub interval_secs: f64,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self { interval_secs: 5.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    #[serde(rename = "interval")]
    pub interval_secs: f64,
    #[serde(rename = "timeout")]
    pub timeout_secs: f64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 1.0, timeout_secs: 10.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateUpdateConfig {
    #[serde(rename = "interval")]
    pub interval_secs: f64,
}

impl Default for StateUpdateConfig {
    fn default() -> Self {
        Self { interval_secs: 2.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "~/.botengine/state.db".into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    pub movement_cost: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self { movement_cost: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub stamina_recovery: f64,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self { stamina_recovery: 0.01 }
    }
}

/// Bot-bootstrap world generation (§3 "Armies are created at bot bootstrap").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorsConfig {
    pub army: ArmyGeneratorConfig,
}

impl Default for GeneratorsConfig {
    fn default() -> Self {
        Self { army: ArmyGeneratorConfig::default() }
    }
}

/// The starting army handed to every newly created bot, keyed by unit-type
/// name, mirroring `ArmyGeneratorConfig.starting_units`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArmyGeneratorConfig {
    pub starting_units: HashMap<String, i64>,
}

impl Default for ArmyGeneratorConfig {
    fn default() -> Self {
        let mut starting_units = HashMap::new();
        starting_units.insert(UnitType::LightInfantry.to_string(), 50);
        starting_units.insert(UnitType::HeavyInfantry.to_string(), 10);
        Self { starting_units }
    }
}
