use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::{BotState, TerrainType, UnitType};

/// A grid cell. Unique on `(x, y)`, immutable after creation (I1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub gid: Uuid,
    pub x: i64,
    pub y: i64,
    pub terrain: TerrainType,
}

impl Location {
    /// True iff `other` is one of the 8 neighboring cells (Chebyshev
    /// distance exactly 1) — adjacency does not include the cell itself.
    pub fn is_adjacent(&self, other: &Location) -> bool {
        let dx = (self.x - other.x).abs();
        let dy = (self.y - other.y).abs();
        dx <= 1 && dy <= 1 && (dx + dy > 0)
    }

    pub fn dump(&self) -> LocationDump {
        LocationDump {
            gid: self.gid,
            x: self.x,
            y: self.y,
            terrain: self.terrain,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationDump {
    pub gid: Uuid,
    pub x: i64,
    pub y: i64,
    pub terrain: TerrainType,
}

/// An account holder. Owns a bounded number of [`Bot`]s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub gid: Uuid,
    pub max_bots: i64,
}

impl Default for User {
    fn default() -> Self {
        Self {
            gid: Uuid::new_v4(),
            max_bots: 1,
        }
    }
}

/// A user-owned executable unit, supervised by one [`crate::agent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub gid: Uuid,
    pub user_gid: Uuid,
    pub name: String,
    pub entry_point: String,
    pub restart_requested: bool,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

impl Bot {
    /// Age of the last heartbeat, or `None` if the bot never reported one.
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.last_heartbeat.map(|hb| now - hb)
    }

    /// Wall-clock time since `start_at`, or `None` if never started.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.start_at.map(|at| now - at)
    }

    /// Derived state per §3: disabled > starting > restarting > unresponsive > running.
    pub fn state(&self, now: DateTime<Utc>, heartbeat_timeout_secs: f64) -> BotState {
        if !self.enabled {
            return BotState::Disabled;
        }
        if self.last_heartbeat.is_none() {
            return BotState::Starting;
        }
        if self.restart_requested {
            return BotState::Restarting;
        }
        if let Some(age) = self.heartbeat_age(now) {
            if age.num_milliseconds() as f64 / 1000.0 > heartbeat_timeout_secs {
                return BotState::Unresponsive;
            }
        }
        BotState::Running
    }

    /// Dump this bot's world-state view, excluding its armies (callers fetch
    /// and attach those separately since they require a database round-trip).
    pub fn dump(
        &self,
        now: DateTime<Utc>,
        heartbeat_timeout_secs: f64,
        armies: Vec<ArmyDump>,
    ) -> BotDump {
        BotDump {
            gid: self.gid,
            name: self.name.clone(),
            enabled: self.enabled,
            state: self.state(now, heartbeat_timeout_secs),
            last_heartbeat: self.last_heartbeat,
            start_at: self.start_at,
            heartbeat_age_sec: self.heartbeat_age(now).map(|d| d.num_milliseconds() as f64 / 1000.0),
            uptime_sec: self.uptime(now).map(|d| d.num_milliseconds() as f64 / 1000.0),
            armies,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotDump {
    pub gid: Uuid,
    pub name: String,
    pub enabled: bool,
    pub state: BotState,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub start_at: Option<DateTime<Utc>>,
    pub heartbeat_age_sec: Option<f64>,
    pub uptime_sec: Option<f64>,
    pub armies: Vec<ArmyDump>,
}

/// 1:1 opaque memory blob carried across a bot's restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotMemory {
    pub gid: Uuid,
    pub bot_gid: Uuid,
    pub data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A collection of [`Unit`]s owned by a [`Bot`], located at one [`Location`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Army {
    pub gid: Uuid,
    pub bot_gid: Uuid,
    pub location_gid: Uuid,
}

impl Army {
    pub fn dump(&self, location: &Location, units: &[Unit], now: DateTime<Utc>) -> ArmyDump {
        ArmyDump {
            gid: self.gid,
            bot_gid: self.bot_gid,
            location: location.dump(),
            units: units.iter().map(|u| u.dump(now)).collect(),
        }
    }

    /// Like [`Self::dump`] but with each unit's derived stamina computed
    /// against its configured recovery rate instead of defaulting to 0.
    pub fn dump_with_recovery(
        &self,
        location: &Location,
        units: &[Unit],
        now: DateTime<Utc>,
        recovery_per_sec: impl Fn(UnitType) -> f64,
    ) -> ArmyDump {
        ArmyDump {
            gid: self.gid,
            bot_gid: self.bot_gid,
            location: location.dump(),
            units: units
                .iter()
                .map(|u| u.dump_with_recovery(now, recovery_per_sec(u.unit_type)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmyDump {
    pub gid: Uuid,
    pub bot_gid: Uuid,
    pub location: LocationDump,
    pub units: Vec<UnitDump>,
}

/// A typed group of soldiers within an [`Army`]. Unique per `(army, type)` (I2).
///
/// `stamina_snapshot` and `updated_at` are private outside this module: the
/// only way to change stamina is [`Unit::set_stamina`], which keeps the pair
/// consistent (§4.7, §9 Open Question — setter-based semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub gid: Uuid,
    pub army_gid: Uuid,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    stamina_snapshot: f64,
    pub count: i64,
    updated_at: DateTime<Utc>,
}

impl Unit {
    /// Construct a new unit at full stamina, snapshotted at `now`.
    pub fn new(gid: Uuid, army_gid: Uuid, unit_type: UnitType, count: i64, now: DateTime<Utc>) -> Self {
        Self {
            gid,
            army_gid,
            unit_type,
            stamina_snapshot: 1.0,
            count,
            updated_at: now,
        }
    }

    /// Reconstruct a unit from stored columns (used when loading from the database).
    pub fn from_stored(
        gid: Uuid,
        army_gid: Uuid,
        unit_type: UnitType,
        stamina_snapshot: f64,
        count: i64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            gid,
            army_gid,
            unit_type,
            stamina_snapshot: stamina_snapshot.clamp(0.0, 1.0),
            count,
            updated_at,
        }
    }

    pub fn stamina_snapshot(&self) -> f64 {
        self.stamina_snapshot
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Derived stamina (I4): recovers linearly at `recovery_per_sec` since
    /// the last snapshot, clamped to `[0, 1]`. Pure function of stored
    /// columns plus `now` — never mutates `self`.
    pub fn stamina(&self, now: DateTime<Utc>, recovery_per_sec: f64) -> f64 {
        let elapsed_secs = (now - self.updated_at).num_milliseconds() as f64 / 1000.0;
        let recovered = self.stamina_snapshot + elapsed_secs.max(0.0) * recovery_per_sec;
        recovered.clamp(0.0, 1.0)
    }

    /// The only writer of stamina: re-snapshots both fields together so a
    /// later read remains a pure function of stored columns and wall-clock.
    pub fn set_stamina(&mut self, value: f64, now: DateTime<Utc>) {
        self.stamina_snapshot = value.clamp(0.0, 1.0);
        self.updated_at = now;
    }

    pub fn dump(&self, now: DateTime<Utc>) -> UnitDump {
        // recovery rate is supplied by dump callers that have access to
        // config; when unavailable (e.g. tests), 0.0 is a safe default that
        // yields the stored snapshot unchanged.
        UnitDump {
            gid: self.gid,
            unit_type: self.unit_type,
            stamina: self.stamina(now, 0.0),
            count: self.count,
        }
    }

    pub fn dump_with_recovery(&self, now: DateTime<Utc>, recovery_per_sec: f64) -> UnitDump {
        UnitDump {
            gid: self.gid,
            unit_type: self.unit_type,
            stamina: self.stamina(now, recovery_per_sec),
            count: self.count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitDump {
    pub gid: Uuid,
    #[serde(rename = "type")]
    pub unit_type: UnitType,
    pub stamina: f64,
    pub count: i64,
}
