//! Database schema definitions and migrations (§3.1).
//!
//! Adapted from the original Postgres DDL: `UUID` columns become `TEXT`
//! (stringified gids), `TIMESTAMPTZ` becomes `TEXT` (RFC 3339), `JSONB`
//! becomes `TEXT` (serialized JSON), `BOOL` becomes `INTEGER`.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Full DDL for the engine state database.
pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS location (
    gid     TEXT PRIMARY KEY,
    x       INTEGER NOT NULL,
    y       INTEGER NOT NULL,
    terrain TEXT NOT NULL DEFAULT 'plains',
    UNIQUE (x, y)
);

CREATE TABLE IF NOT EXISTS user_account (
    gid      TEXT PRIMARY KEY,
    max_bots INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS bot (
    gid                TEXT PRIMARY KEY,
    user_gid           TEXT NOT NULL REFERENCES user_account (gid) ON DELETE CASCADE,
    name               TEXT NOT NULL,
    entry_point        TEXT,
    restart_requested  INTEGER NOT NULL DEFAULT 0,
    last_heartbeat     TEXT,
    start_at           TEXT,
    enabled            INTEGER NOT NULL DEFAULT 1,
    UNIQUE (user_gid, name)
);

CREATE TABLE IF NOT EXISTS army (
    gid         TEXT PRIMARY KEY,
    bot_gid     TEXT NOT NULL REFERENCES bot (gid) ON DELETE CASCADE,
    location_gid TEXT NOT NULL REFERENCES location (gid)
);

CREATE TABLE IF NOT EXISTS bot_memory (
    gid        TEXT PRIMARY KEY,
    bot_gid    TEXT NOT NULL UNIQUE REFERENCES bot (gid) ON DELETE CASCADE,
    data       TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message (
    gid         TEXT PRIMARY KEY,
    bot_gid     TEXT NOT NULL REFERENCES bot (gid) ON DELETE CASCADE,
    type        TEXT NOT NULL,
    datetime    TEXT NOT NULL,
    response_to TEXT,
    payload     TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS unit (
    gid              TEXT PRIMARY KEY,
    army_gid         TEXT NOT NULL REFERENCES army (gid) ON DELETE CASCADE,
    type             TEXT NOT NULL,
    stamina_snapshot REAL NOT NULL DEFAULT 1,
    count            INTEGER NOT NULL,
    updated_at       TEXT NOT NULL,
    UNIQUE (army_gid, type)
);

CREATE INDEX IF NOT EXISTS idx_bot_user ON bot(user_gid);
CREATE INDEX IF NOT EXISTS idx_army_bot ON army(bot_gid);
CREATE INDEX IF NOT EXISTS idx_unit_army ON unit(army_gid);
CREATE INDEX IF NOT EXISTS idx_message_bot ON message(bot_gid);
CREATE INDEX IF NOT EXISTS idx_message_datetime ON message(datetime);
"#;

/// Migration from version 1 to version 2: swamp terrain support (supplemented
/// from the original's later "add swamp type" migration).
pub const MIGRATE_V1_TO_V2: &str = r#"
UPDATE location SET terrain = 'plains' WHERE terrain NOT IN ('plains', 'forest', 'swamp');
"#;
