//! Shared helpers for building the `state_sync`/`memory_download` payloads
//! pushed by the restart loop (initial push) and the state-update loop
//! (periodic push) — §4.4, §4.6 `state_sync` payload shape.

use chrono::Utc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::state::Database;

/// Build the `{me: <bot-dump>}` payload for a `state_sync` message (§6).
/// Dumps exclude nothing unsafe to serialize — derived fields only.
pub fn state_sync_payload(db: &Database, config: &EngineConfig, bot_gid: Uuid) -> Option<serde_json::Value> {
    let bot = db.get_bot(bot_gid).ok()??;
    let now = Utc::now();

    let armies = db.list_armies_for_bot(bot_gid).ok()?;
    let mut army_dumps = Vec::with_capacity(armies.len());
    for army in &armies {
        let location = db.get_location(army.location_gid).ok()??;
        let units = db.list_units(army.gid).ok()?;
        let dump = army.dump_with_recovery(&location, &units, now, |t| config.stamina_recovery(t));
        army_dumps.push(dump);
    }

    let dump = bot.dump(now, config.lifecycle.heartbeat.timeout_secs, army_dumps);
    Some(serde_json::json!({ "me": dump }))
}

/// Build the payload for a `memory_download` message: the bot's persisted
/// memory blob, or an empty object if it has never uploaded one.
pub fn memory_download_payload(db: &Database, bot_gid: Uuid) -> serde_json::Value {
    match db.get_memory(bot_gid) {
        Ok(Some(memory)) => memory.data,
        Ok(None) => serde_json::json!({}),
        Err(_) => serde_json::json!({}),
    }
}
