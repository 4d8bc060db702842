//! SQLite-backed persistence (§3.1). One [`Database`] owns the connection;
//! read helpers are free functions over `&Connection` so the exact same
//! query logic runs whether called directly or inside a
//! [`Database::begin`] transaction — the idiom command handlers use to get
//! "read-then-write within a single logical transaction per command"
//! (§5 "Shared resources").

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    Army, Bot, BotMemory, Location, TerrainType, Unit, UnitType, User,
};
use crate::state::schema;
use crate::wire::Message;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Conflict(String),
    #[error("user already has the maximum number of bots ({0})")]
    MaxBotsExceeded(i64),
}

type Result<T> = std::result::Result<T, StorageError>;

/// Owns the engine's embedded SQLite connection.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Conflict(format!("failed to create database directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database — used by tests and the deterministic-clock
    /// scheduler tests (spec.md §9 "Cooperative concurrency").
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        let mut db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&mut self) -> Result<()> {
        let version = self.schema_version();
        if version == 0 {
            self.conn.execute_batch(schema::CREATE_SCHEMA)?;
            self.conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![schema::SCHEMA_VERSION],
            )?;
        } else if version < schema::SCHEMA_VERSION {
            if version < 2 {
                self.conn.execute_batch(schema::MIGRATE_V1_TO_V2)?;
            }
            self.conn.execute(
                "UPDATE schema_version SET version = ?1",
                params![schema::SCHEMA_VERSION],
            )?;
        }
        Ok(())
    }

    fn schema_version(&self) -> u32 {
        self.conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .unwrap_or(0)
    }

    /// Open a transaction for a command handler's read-then-write sequence
    /// (§4.6 — `move`/`split`/`merge` each run inside exactly one of these).
    pub fn begin(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    // -----------------------------------------------------------------------
    // Users
    // -----------------------------------------------------------------------

    pub fn create_user(&self, max_bots: i64) -> Result<User> {
        create_user(&self.conn, max_bots)
    }

    pub fn get_user(&self, gid: Uuid) -> Result<Option<User>> {
        get_user(&self.conn, gid)
    }

    // -----------------------------------------------------------------------
    // Bots
    // -----------------------------------------------------------------------

    pub fn create_bot(&self, user_gid: Uuid, name: &str, entry_point: &str) -> Result<Bot> {
        create_bot(&self.conn, user_gid, name, entry_point)
    }

    pub fn get_bot(&self, gid: Uuid) -> Result<Option<Bot>> {
        get_bot(&self.conn, gid)
    }

    pub fn list_bots(&self) -> Result<Vec<Bot>> {
        list_bots(&self.conn)
    }

    /// Restart-loop bookkeeping: persist exactly the three fields the spec
    /// calls out (§4.4), in one statement.
    pub fn finish_restart(&self, gid: Uuid, start_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE bot SET restart_requested = 0, last_heartbeat = NULL, start_at = ?2 WHERE gid = ?1",
            params![gid.to_string(), start_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_last_heartbeat(&self, gid: Uuid, when: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE bot SET last_heartbeat = ?2 WHERE gid = ?1",
            params![gid.to_string(), when.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_enabled(&self, gid: Uuid, enabled: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE bot SET enabled = ?2 WHERE gid = ?1",
            params![gid.to_string(), enabled as i64],
        )?;
        Ok(())
    }

    pub fn request_restart(&self, gid: Uuid) -> Result<()> {
        self.conn.execute(
            "UPDATE bot SET restart_requested = 1 WHERE gid = ?1",
            params![gid.to_string()],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Locations
    // -----------------------------------------------------------------------

    pub fn create_location(&self, x: i64, y: i64, terrain: TerrainType) -> Result<Location> {
        create_location(&self.conn, x, y, terrain)
    }

    pub fn get_location(&self, gid: Uuid) -> Result<Option<Location>> {
        get_location(&self.conn, gid)
    }

    pub fn get_location_by_xy(&self, x: i64, y: i64) -> Result<Option<Location>> {
        get_location_by_xy(&self.conn, x, y)
    }

    /// Idempotent helper for bootstrap/tests: fetch the location at `(x, y)`
    /// or create it with `terrain` if absent (I1: `(x,y)` stays unique).
    pub fn get_or_create_location(&self, x: i64, y: i64, terrain: TerrainType) -> Result<Location> {
        if let Some(loc) = get_location_by_xy(&self.conn, x, y)? {
            return Ok(loc);
        }
        create_location(&self.conn, x, y, terrain)
    }

    // -----------------------------------------------------------------------
    // Armies & units
    // -----------------------------------------------------------------------

    pub fn create_army(&self, bot_gid: Uuid, location_gid: Uuid) -> Result<Army> {
        create_army(&self.conn, bot_gid, location_gid)
    }

    /// Create and persist a complete starting army for a newly bootstrapped
    /// bot (§3 "Armies are created at bot bootstrap (starting army
    /// placement)"), grounded on `starting_army()`: one army at `location_gid`
    /// plus one `Unit` per `(type, count)` pair in `starting_units`. Unknown
    /// unit-type keys are skipped rather than failing bootstrap.
    pub fn create_starting_army(
        &self,
        bot_gid: Uuid,
        location_gid: Uuid,
        starting_units: &std::collections::HashMap<String, i64>,
    ) -> Result<Army> {
        let army = create_army(&self.conn, bot_gid, location_gid)?;
        let now = Utc::now();
        for (type_name, &count) in starting_units {
            if count <= 0 {
                continue;
            }
            let Ok(unit_type) = type_name.parse::<UnitType>() else {
                continue;
            };
            let unit = Unit::new(Uuid::new_v4(), army.gid, unit_type, count, now);
            create_unit(&self.conn, &unit)?;
        }
        Ok(army)
    }

    pub fn list_armies_for_bot(&self, bot_gid: Uuid) -> Result<Vec<Army>> {
        list_armies_for_bot(&self.conn, bot_gid)
    }

    pub fn list_units(&self, army_gid: Uuid) -> Result<Vec<Unit>> {
        list_units(&self.conn, army_gid)
    }

    pub fn save_unit(&self, unit: &Unit) -> Result<()> {
        save_unit(&self.conn, unit)
    }

    // -----------------------------------------------------------------------
    // Memory
    // -----------------------------------------------------------------------

    pub fn get_memory(&self, bot_gid: Uuid) -> Result<Option<BotMemory>> {
        get_memory(&self.conn, bot_gid)
    }

    pub fn upsert_memory(&self, bot_gid: Uuid, data: serde_json::Value, updated_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO bot_memory (gid, bot_gid, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(bot_gid) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            params![Uuid::new_v4().to_string(), bot_gid.to_string(), data.to_string(), updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    pub fn insert_message(&self, msg: &Message) -> Result<()> {
        self.conn.execute(
            "INSERT INTO message (gid, bot_gid, type, datetime, response_to, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.gid.to_string(),
                msg.bot_id.to_string(),
                msg.message_type.to_string(),
                msg.datetime.to_rfc3339(),
                msg.response_to.map(|g| g.to_string()),
                msg.payload.to_string(),
            ],
        )?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Free query functions — reused by both `Database` methods (plain connection)
// and command handlers operating inside a `Transaction` (which derefs to
// `Connection`).
// ---------------------------------------------------------------------------

pub fn create_user(conn: &Connection, max_bots: i64) -> Result<User> {
    let user = User { gid: Uuid::new_v4(), max_bots };
    conn.execute(
        "INSERT INTO user_account (gid, max_bots) VALUES (?1, ?2)",
        params![user.gid.to_string(), user.max_bots],
    )?;
    Ok(user)
}

pub fn get_user(conn: &Connection, gid: Uuid) -> Result<Option<User>> {
    conn.query_row(
        "SELECT gid, max_bots FROM user_account WHERE gid = ?1",
        params![gid.to_string()],
        |row| {
            Ok(User {
                gid: parse_uuid(row.get::<_, String>(0)?),
                max_bots: row.get(1)?,
            })
        },
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn create_bot(conn: &Connection, user_gid: Uuid, name: &str, entry_point: &str) -> Result<Bot> {
    let bot_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM bot WHERE user_gid = ?1",
        params![user_gid.to_string()],
        |row| row.get(0),
    )?;
    let max_bots: i64 = conn
        .query_row("SELECT max_bots FROM user_account WHERE gid = ?1", params![user_gid.to_string()], |row| row.get(0))
        .optional()?
        .unwrap_or(1);
    if bot_count >= max_bots {
        return Err(StorageError::MaxBotsExceeded(max_bots));
    }

    let bot = Bot {
        gid: Uuid::new_v4(),
        user_gid,
        name: name.to_string(),
        entry_point: entry_point.to_string(),
        restart_requested: false,
        last_heartbeat: None,
        start_at: None,
        enabled: true,
    };
    conn.execute(
        "INSERT INTO bot (gid, user_gid, name, entry_point, restart_requested, last_heartbeat, start_at, enabled)
         VALUES (?1, ?2, ?3, ?4, 0, NULL, NULL, 1)",
        params![bot.gid.to_string(), user_gid.to_string(), bot.name, bot.entry_point],
    ).map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::Conflict(format!("bot name '{name}' already exists for this user"))
        }
        other => StorageError::Sqlite(other),
    })?;
    Ok(bot)
}

pub fn get_bot(conn: &Connection, gid: Uuid) -> Result<Option<Bot>> {
    conn.query_row(
        "SELECT gid, user_gid, name, entry_point, restart_requested, last_heartbeat, start_at, enabled
         FROM bot WHERE gid = ?1",
        params![gid.to_string()],
        row_to_bot,
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn list_bots(conn: &Connection) -> Result<Vec<Bot>> {
    let mut stmt = conn.prepare(
        "SELECT gid, user_gid, name, entry_point, restart_requested, last_heartbeat, start_at, enabled FROM bot",
    )?;
    let rows = stmt.query_map([], row_to_bot)?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(StorageError::from)
}

fn row_to_bot(row: &rusqlite::Row) -> rusqlite::Result<Bot> {
    let last_heartbeat: Option<String> = row.get(5)?;
    let start_at: Option<String> = row.get(6)?;
    Ok(Bot {
        gid: parse_uuid(row.get::<_, String>(0)?),
        user_gid: parse_uuid(row.get::<_, String>(1)?),
        name: row.get(2)?,
        entry_point: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        restart_requested: row.get::<_, i64>(4)? != 0,
        last_heartbeat: last_heartbeat.map(|s| parse_datetime(&s)),
        start_at: start_at.map(|s| parse_datetime(&s)),
        enabled: row.get::<_, i64>(7)? != 0,
    })
}

pub fn create_location(conn: &Connection, x: i64, y: i64, terrain: TerrainType) -> Result<Location> {
    let loc = Location { gid: Uuid::new_v4(), x, y, terrain };
    conn.execute(
        "INSERT INTO location (gid, x, y, terrain) VALUES (?1, ?2, ?3, ?4)",
        params![loc.gid.to_string(), x, y, terrain.to_string()],
    ).map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
            StorageError::Conflict(format!("location ({x}, {y}) already exists"))
        }
        other => StorageError::Sqlite(other),
    })?;
    Ok(loc)
}

pub fn get_location(conn: &Connection, gid: Uuid) -> Result<Option<Location>> {
    conn.query_row(
        "SELECT gid, x, y, terrain FROM location WHERE gid = ?1",
        params![gid.to_string()],
        row_to_location,
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn get_location_by_xy(conn: &Connection, x: i64, y: i64) -> Result<Option<Location>> {
    conn.query_row(
        "SELECT gid, x, y, terrain FROM location WHERE x = ?1 AND y = ?2",
        params![x, y],
        row_to_location,
    )
    .optional()
    .map_err(StorageError::from)
}

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    let terrain: String = row.get(3)?;
    Ok(Location {
        gid: parse_uuid(row.get::<_, String>(0)?),
        x: row.get(1)?,
        y: row.get(2)?,
        terrain: terrain.parse().unwrap_or(TerrainType::Plains),
    })
}

/// Load an army scoped to `bot_gid` — matches §4.6's "Load Army ... scoped
/// to this bot" guard on every handler.
pub fn get_army_scoped(conn: &Connection, bot_gid: Uuid, army_gid: Uuid) -> Result<Option<Army>> {
    conn.query_row(
        "SELECT gid, bot_gid, location_gid FROM army WHERE gid = ?1 AND bot_gid = ?2",
        params![army_gid.to_string(), bot_gid.to_string()],
        row_to_army,
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn get_army(conn: &Connection, army_gid: Uuid) -> Result<Option<Army>> {
    conn.query_row(
        "SELECT gid, bot_gid, location_gid FROM army WHERE gid = ?1",
        params![army_gid.to_string()],
        row_to_army,
    )
    .optional()
    .map_err(StorageError::from)
}

pub fn create_army(conn: &Connection, bot_gid: Uuid, location_gid: Uuid) -> Result<Army> {
    let army = Army { gid: Uuid::new_v4(), bot_gid, location_gid };
    conn.execute(
        "INSERT INTO army (gid, bot_gid, location_gid) VALUES (?1, ?2, ?3)",
        params![army.gid.to_string(), bot_gid.to_string(), location_gid.to_string()],
    )?;
    Ok(army)
}

pub fn set_army_location(conn: &Connection, army_gid: Uuid, location_gid: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE army SET location_gid = ?2 WHERE gid = ?1",
        params![army_gid.to_string(), location_gid.to_string()],
    )?;
    Ok(())
}

pub fn delete_army(conn: &Connection, army_gid: Uuid) -> Result<()> {
    conn.execute("DELETE FROM army WHERE gid = ?1", params![army_gid.to_string()])?;
    Ok(())
}

pub fn list_armies_for_bot(conn: &Connection, bot_gid: Uuid) -> Result<Vec<Army>> {
    let mut stmt = conn.prepare("SELECT gid, bot_gid, location_gid FROM army WHERE bot_gid = ?1")?;
    let rows = stmt.query_map(params![bot_gid.to_string()], row_to_army)?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(StorageError::from)
}

fn row_to_army(row: &rusqlite::Row) -> rusqlite::Result<Army> {
    Ok(Army {
        gid: parse_uuid(row.get::<_, String>(0)?),
        bot_gid: parse_uuid(row.get::<_, String>(1)?),
        location_gid: parse_uuid(row.get::<_, String>(2)?),
    })
}

pub fn list_units(conn: &Connection, army_gid: Uuid) -> Result<Vec<Unit>> {
    let mut stmt = conn.prepare(
        "SELECT gid, army_gid, type, stamina_snapshot, count, updated_at FROM unit WHERE army_gid = ?1",
    )?;
    let rows = stmt.query_map(params![army_gid.to_string()], row_to_unit)?;
    rows.collect::<std::result::Result<Vec<_>, _>>().map_err(StorageError::from)
}

pub fn get_unit(conn: &Connection, unit_gid: Uuid) -> Result<Option<Unit>> {
    conn.query_row(
        "SELECT gid, army_gid, type, stamina_snapshot, count, updated_at FROM unit WHERE gid = ?1",
        params![unit_gid.to_string()],
        row_to_unit,
    )
    .optional()
    .map_err(StorageError::from)
}

/// Insert a brand new unit row (I2/I3 are enforced by callers: one row per
/// `(army, type)`, `count >= 1`).
pub fn create_unit(conn: &Connection, unit: &Unit) -> Result<()> {
    conn.execute(
        "INSERT INTO unit (gid, army_gid, type, stamina_snapshot, count, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            unit.gid.to_string(),
            unit.army_gid.to_string(),
            unit.unit_type.to_string(),
            unit.stamina_snapshot(),
            unit.count,
            unit.updated_at().to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn save_unit(conn: &Connection, unit: &Unit) -> Result<()> {
    conn.execute(
        "UPDATE unit SET stamina_snapshot = ?2, count = ?3, updated_at = ?4 WHERE gid = ?1",
        params![unit.gid.to_string(), unit.stamina_snapshot(), unit.count, unit.updated_at().to_rfc3339()],
    )?;
    Ok(())
}

pub fn delete_unit(conn: &Connection, unit_gid: Uuid) -> Result<()> {
    conn.execute("DELETE FROM unit WHERE gid = ?1", params![unit_gid.to_string()])?;
    Ok(())
}

/// Move a unit to a different army (`merge`'s reparent path, §4.6) without
/// touching its stamina/count.
pub fn reparent_unit(conn: &Connection, unit_gid: Uuid, new_army_gid: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE unit SET army_gid = ?2 WHERE gid = ?1",
        params![unit_gid.to_string(), new_army_gid.to_string()],
    )?;
    Ok(())
}

fn row_to_unit(row: &rusqlite::Row) -> rusqlite::Result<Unit> {
    let unit_type: String = row.get(2)?;
    let updated_at: String = row.get(5)?;
    Ok(Unit::from_stored(
        parse_uuid(row.get::<_, String>(0)?),
        parse_uuid(row.get::<_, String>(1)?),
        unit_type.parse().unwrap_or(UnitType::LightInfantry),
        row.get(3)?,
        row.get(4)?,
        parse_datetime(&updated_at),
    ))
}

pub fn get_memory(conn: &Connection, bot_gid: Uuid) -> Result<Option<BotMemory>> {
    conn.query_row(
        "SELECT gid, bot_gid, data, updated_at FROM bot_memory WHERE bot_gid = ?1",
        params![bot_gid.to_string()],
        |row| {
            let data: String = row.get(2)?;
            let updated_at: String = row.get(3)?;
            Ok(BotMemory {
                gid: parse_uuid(row.get::<_, String>(0)?),
                bot_gid: parse_uuid(row.get::<_, String>(1)?),
                data: serde_json::from_str(&data).unwrap_or(serde_json::Value::Null),
                updated_at: parse_datetime(&updated_at),
            })
        },
    )
    .optional()
    .map_err(StorageError::from)
}

fn parse_uuid(s: String) -> Uuid {
    Uuid::parse_str(&s).unwrap_or_else(|_| Uuid::nil())
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_name_unique_per_user() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(2).unwrap();
        db.create_bot(user.gid, "scout", "bots/scout.py").unwrap();
        let err = db.create_bot(user.gid, "scout", "bots/other.py").unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn max_bots_enforced() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(1).unwrap();
        db.create_bot(user.gid, "one", "bots/one.py").unwrap();
        let err = db.create_bot(user.gid, "two", "bots/two.py").unwrap_err();
        assert!(matches!(err, StorageError::MaxBotsExceeded(1)));
    }

    #[test]
    fn location_xy_unique() {
        let db = Database::open_in_memory().unwrap();
        db.create_location(1, 1, TerrainType::Plains).unwrap();
        let err = db.create_location(1, 1, TerrainType::Forest).unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[test]
    fn unit_round_trips_stamina_and_count() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(1).unwrap();
        let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
        let loc = db.create_location(0, 0, TerrainType::Plains).unwrap();
        let army = db.create_army(bot.gid, loc.gid).unwrap();

        let now = Utc::now();
        let mut unit = Unit::new(Uuid::new_v4(), army.gid, UnitType::Archer, 10, now);
        unit.set_stamina(0.5, now);
        create_unit(&db.conn, &unit).unwrap();

        let loaded = get_unit(&db.conn, unit.gid).unwrap().unwrap();
        assert_eq!(loaded.count, 10);
        assert_eq!(loaded.stamina_snapshot(), 0.5);
    }

    #[test]
    fn starting_army_is_seeded_with_configured_units() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(1).unwrap();
        let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
        let loc = db.create_location(0, 0, TerrainType::Plains).unwrap();

        let mut starting_units = std::collections::HashMap::new();
        starting_units.insert("light_infantry".to_string(), 50);
        starting_units.insert("heavy_infantry".to_string(), 10);
        starting_units.insert("not_a_real_type".to_string(), 5);

        let army = db.create_starting_army(bot.gid, loc.gid, &starting_units).unwrap();

        assert_eq!(army.bot_gid, bot.gid);
        assert_eq!(army.location_gid, loc.gid);
        let units = db.list_units(army.gid).unwrap();
        assert_eq!(units.len(), 2);
        assert!(units.iter().any(|u| u.unit_type == UnitType::LightInfantry && u.count == 50));
        assert!(units.iter().any(|u| u.unit_type == UnitType::HeavyInfantry && u.count == 10));
    }
}
