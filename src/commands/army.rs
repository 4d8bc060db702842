//! `move`, `split`, `merge` — the three army commands (§4.6). Each handler
//! reads authoritative state, validates it, mutates within one transaction,
//! and replies with dumps of the affected entities.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::commands::{error, success, Handler, Router};
use crate::config::EngineConfig;
use crate::model::{Army, Location, Unit};
use crate::state::database::{
    self, create_army, delete_army, delete_unit, get_army_scoped, get_location, get_location_by_xy, list_units,
    reparent_unit, save_unit, set_army_location,
};
use crate::state::Database;
use crate::wire::Message;

pub fn router(config: EngineConfig) -> Router {
    let cfg = Arc::new(config);

    let move_cfg = cfg.clone();
    let move_handler: Handler = Arc::new(move |db, bot_gid, msg| handle_move(db, bot_gid, msg, &move_cfg));

    let split_cfg = cfg.clone();
    let split_handler: Handler = Arc::new(move |db, bot_gid, msg| handle_split(db, bot_gid, msg, &split_cfg));

    let merge_cfg = cfg;
    let merge_handler: Handler = Arc::new(move |db, bot_gid, msg| handle_merge(db, bot_gid, msg, &merge_cfg));

    Router::new().route("move", move_handler).route("split", split_handler).route("merge", merge_handler)
}

fn dump_army(config: &EngineConfig, army: &Army, location: &Location, units: &[Unit]) -> serde_json::Value {
    let now = Utc::now();
    let dump = army.dump_with_recovery(location, units, now, |t| config.stamina_recovery(t));
    serde_json::to_value(dump).unwrap_or(serde_json::Value::Null)
}

#[derive(Debug, Deserialize)]
struct MoveInput {
    army_gid: Uuid,
    location: XY,
}

#[derive(Debug, Deserialize)]
struct XY {
    x: i64,
    y: i64,
}

fn handle_move(db: &mut Database, bot_gid: Uuid, message: &Message, config: &EngineConfig) -> serde_json::Value {
    let input: MoveInput = match serde_json::from_value(message.payload.clone()) {
        Ok(v) => v,
        Err(e) => return error(format!("invalid move payload: {e}")),
    };

    let tx = match db.begin() {
        Ok(tx) => tx,
        Err(e) => return error(e.to_string()),
    };

    let army = match get_army_scoped(&tx, bot_gid, input.army_gid) {
        Ok(Some(a)) => a,
        Ok(None) => return error("Army not found"),
        Err(e) => return error(e.to_string()),
    };
    let current_location = match get_location(&tx, army.location_gid) {
        Ok(Some(l)) => l,
        Ok(None) => return error("Location not found"),
        Err(e) => return error(e.to_string()),
    };
    let target_location = match get_location_by_xy(&tx, input.location.x, input.location.y) {
        Ok(Some(l)) => l,
        Ok(None) => return error("Location not found"),
        Err(e) => return error(e.to_string()),
    };

    if target_location.gid == current_location.gid {
        return error("Already at destination");
    }
    if !current_location.is_adjacent(&target_location) {
        return error("Destination not adjacent");
    }

    let movement_cost = config.movement_cost(target_location.terrain);
    let now = Utc::now();
    let mut units = match list_units(&tx, army.gid) {
        Ok(u) => u,
        Err(e) => return error(e.to_string()),
    };

    for unit in &units {
        let recovery = config.stamina_recovery(unit.unit_type);
        if unit.stamina(now, recovery) < movement_cost {
            return error("Not enough stamina");
        }
    }

    for unit in &mut units {
        let recovery = config.stamina_recovery(unit.unit_type);
        let remaining = unit.stamina(now, recovery) - movement_cost;
        unit.set_stamina(remaining, now);
        if let Err(e) = save_unit(&tx, unit) {
            return error(e.to_string());
        }
    }
    if let Err(e) = set_army_location(&tx, army.gid, target_location.gid) {
        return error(e.to_string());
    }
    if let Err(e) = tx.commit() {
        return error(e.to_string());
    }

    success(serde_json::json!({
        "army": dump_army(config, &Army { gid: army.gid, bot_gid: army.bot_gid, location_gid: target_location.gid }, &target_location, &units),
        "location": target_location.dump(),
    }))
}

#[derive(Debug, Deserialize)]
struct SplitInput {
    army_gid: Uuid,
    units: HashMap<Uuid, i64>,
}

fn handle_split(db: &mut Database, bot_gid: Uuid, message: &Message, config: &EngineConfig) -> serde_json::Value {
    let input: SplitInput = match serde_json::from_value(message.payload.clone()) {
        Ok(v) => v,
        Err(e) => return error(format!("invalid split payload: {e}")),
    };

    if input.units.values().all(|&c| c == 0) {
        return error("No units to split");
    }

    let tx = match db.begin() {
        Ok(tx) => tx,
        Err(e) => return error(e.to_string()),
    };

    let army = match get_army_scoped(&tx, bot_gid, input.army_gid) {
        Ok(Some(a)) => a,
        Ok(None) => return error("Army not found"),
        Err(e) => return error(e.to_string()),
    };
    let location = match get_location(&tx, army.location_gid) {
        Ok(Some(l)) => l,
        Ok(None) => return error("Location not found"),
        Err(e) => return error(e.to_string()),
    };

    let mut source_units = match list_units(&tx, army.gid) {
        Ok(u) => u,
        Err(e) => return error(e.to_string()),
    };

    for (&unit_gid, &count) in &input.units {
        if count <= 0 {
            return error("Split count must be positive");
        }
        let Some(unit) = source_units.iter().find(|u| u.gid == unit_gid) else {
            return error("Unit not found");
        };
        if count > unit.count {
            return error("Not enough units to split");
        }
    }

    let emptied = source_units.iter().all(|u| {
        let requested = input.units.get(&u.gid).copied().unwrap_or(0);
        u.count - requested == 0
    });
    if emptied {
        return error("Cannot split all units from army");
    }

    let new_army = match create_army(&tx, bot_gid, army.location_gid) {
        Ok(a) => a,
        Err(e) => return error(e.to_string()),
    };

    let mut new_units = Vec::new();
    for unit in &mut source_units {
        let Some(&requested) = input.units.get(&unit.gid) else { continue };
        if requested == 0 {
            continue;
        }
        let split_off = Unit::from_stored(
            Uuid::new_v4(),
            new_army.gid,
            unit.unit_type,
            unit.stamina_snapshot(),
            requested,
            unit.updated_at(),
        );
        if let Err(e) = database::create_unit(&tx, &split_off) {
            return error(e.to_string());
        }
        new_units.push(split_off);

        unit.count -= requested;
        if unit.count == 0 {
            if let Err(e) = delete_unit(&tx, unit.gid) {
                return error(e.to_string());
            }
        } else if let Err(e) = save_unit(&tx, unit) {
            return error(e.to_string());
        }
    }
    source_units.retain(|u| u.count > 0);

    if let Err(e) = tx.commit() {
        return error(e.to_string());
    }

    success(serde_json::json!({
        "army": dump_army(config, &army, &location, &source_units),
        "new_army": dump_army(config, &new_army, &location, &new_units),
    }))
}

#[derive(Debug, Deserialize)]
struct MergeInput {
    armies: Vec<Uuid>,
}

fn handle_merge(db: &mut Database, bot_gid: Uuid, message: &Message, config: &EngineConfig) -> serde_json::Value {
    let input: MergeInput = match serde_json::from_value(message.payload.clone()) {
        Ok(v) => v,
        Err(e) => return error(format!("invalid merge payload: {e}")),
    };
    let unique: std::collections::HashSet<_> = input.armies.iter().collect();
    if input.armies.len() < 2 || unique.len() != input.armies.len() {
        return error("At least two distinct armies are required to merge");
    }

    let tx = match db.begin() {
        Ok(tx) => tx,
        Err(e) => return error(e.to_string()),
    };

    let mut armies = Vec::new();
    for &gid in &input.armies {
        match get_army_scoped(&tx, bot_gid, gid) {
            Ok(Some(a)) => armies.push(a),
            Ok(None) => return error("Army not found"),
            Err(e) => return error(e.to_string()),
        }
    }

    let target = armies[0].clone();
    for other in &armies[1..] {
        if other.location_gid != target.location_gid {
            return error("All armies must be in the same location to merge");
        }
    }

    let location = match get_location(&tx, target.location_gid) {
        Ok(Some(l)) => l,
        Ok(None) => return error("Location not found"),
        Err(e) => return error(e.to_string()),
    };

    let now = Utc::now();
    let mut target_units = match list_units(&tx, target.gid) {
        Ok(u) => u,
        Err(e) => return error(e.to_string()),
    };

    for other in &armies[1..] {
        let other_units = match list_units(&tx, other.gid) {
            Ok(u) => u,
            Err(e) => return error(e.to_string()),
        };
        for other_unit in other_units {
            let recovery = config.stamina_recovery(other_unit.unit_type);
            let other_stamina = other_unit.stamina(now, recovery);

            match target_units.iter_mut().find(|u| u.unit_type == other_unit.unit_type) {
                None => {
                    if let Err(e) = reparent_unit(&tx, other_unit.gid, target.gid) {
                        return error(e.to_string());
                    }
                    let mut reparented = other_unit;
                    reparented.army_gid = target.gid;
                    target_units.push(reparented);
                }
                Some(target_unit) => {
                    let target_recovery = config.stamina_recovery(target_unit.unit_type);
                    let target_stamina = target_unit.stamina(now, target_recovery);
                    let c_t = target_unit.count as f64;
                    let c_o = other_unit.count as f64;
                    let weighted = (target_stamina * c_t + other_stamina * c_o) / (c_t + c_o);

                    target_unit.count += other_unit.count;
                    target_unit.set_stamina(weighted, now);
                    if let Err(e) = save_unit(&tx, target_unit) {
                        return error(e.to_string());
                    }
                    if let Err(e) = delete_unit(&tx, other_unit.gid) {
                        return error(e.to_string());
                    }
                }
            }
        }
        if let Err(e) = delete_army(&tx, other.gid) {
            return error(e.to_string());
        }
    }

    if let Err(e) = tx.commit() {
        return error(e.to_string());
    }

    success(serde_json::json!({
        "army": dump_army(config, &target, &location, &target_units),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnitType;

    fn setup() -> (Database, Uuid, Uuid) {
        let mut db = Database::open_in_memory().unwrap();
        let user = db.create_user(10).unwrap();
        let bot = db.create_bot(user.gid, "b", "bots/b.py").unwrap();
        let origin = db.create_location(0, 0, crate::model::TerrainType::Plains).unwrap();
        let army = db.create_army(bot.gid, origin.gid).unwrap();

        let now = Utc::now();
        let unit = Unit::new(Uuid::new_v4(), army.gid, UnitType::Archer, 10, now);
        let tx = db.begin().unwrap();
        database::create_unit(&tx, &unit).unwrap();
        tx.commit().unwrap();

        (db, bot.gid, army.gid)
    }

    fn command(name: &str, army_gid: Uuid, payload: serde_json::Value) -> Message {
        let mut obj = serde_json::Map::new();
        obj.insert("command".into(), name.into());
        obj.insert("army_gid".into(), army_gid.to_string().into());
        if let serde_json::Value::Object(extra) = payload {
            obj.extend(extra);
        }
        Message::new(Uuid::new_v4(), crate::model::MessageType::Command, serde_json::Value::Object(obj))
    }

    #[test]
    fn move_to_adjacent_location_succeeds() {
        let (mut db, bot_gid, army_gid) = setup();
        db.create_location(1, 1, crate::model::TerrainType::Plains).unwrap();

        let msg = command("move", army_gid, serde_json::json!({"location": {"x": 1, "y": 1}}));
        let result = handle_move(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "success");
    }

    #[test]
    fn move_to_non_adjacent_location_is_rejected() {
        let (mut db, bot_gid, army_gid) = setup();
        db.create_location(5, 5, crate::model::TerrainType::Plains).unwrap();

        let msg = command("move", army_gid, serde_json::json!({"location": {"x": 5, "y": 5}}));
        let result = handle_move(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "error");
        assert_eq!(result["reason"], "Destination not adjacent");
    }

    #[test]
    fn move_without_enough_stamina_is_rejected() {
        let (mut db, bot_gid, army_gid) = setup();
        db.create_location(1, 0, crate::model::TerrainType::Swamp).unwrap();
        let tx = db.begin().unwrap();
        let units = list_units(&tx, army_gid).unwrap();
        for mut unit in units {
            unit.set_stamina(0.0, Utc::now());
            save_unit(&tx, &unit).unwrap();
        }
        tx.commit().unwrap();

        let msg = command("move", army_gid, serde_json::json!({"location": {"x": 1, "y": 0}}));
        let result = handle_move(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "error");
        assert_eq!(result["reason"], "Not enough stamina");
    }

    #[test]
    fn split_preserves_total_unit_count() {
        let (mut db, bot_gid, army_gid) = setup();
        let unit = db.list_units(army_gid).unwrap().into_iter().next().unwrap();

        let mut units = HashMap::new();
        units.insert(unit.gid, 4);
        let msg = command("split", army_gid, serde_json::json!({"units": units}));
        let result = handle_split(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "success");
        assert_eq!(result["army"]["units"][0]["count"], 6);
        assert_eq!(result["new_army"]["units"][0]["count"], 4);
    }

    #[test]
    fn split_that_empties_source_army_is_rejected() {
        let (mut db, bot_gid, army_gid) = setup();
        let unit = db.list_units(army_gid).unwrap().into_iter().next().unwrap();

        let mut units = HashMap::new();
        units.insert(unit.gid, unit.count);
        let msg = command("split", army_gid, serde_json::json!({"units": units}));
        let result = handle_split(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "error");
        assert_eq!(result["reason"], "Cannot split all units from army");
    }

    #[test]
    fn merge_combines_matching_unit_types_with_weighted_stamina() {
        let (mut db, bot_gid, army_gid) = setup();
        let origin = db.get_location_by_xy(0, 0).unwrap().unwrap();
        let second_army = db.create_army(bot_gid, origin.gid).unwrap();

        let now = Utc::now();
        let mut other_unit = Unit::new(Uuid::new_v4(), second_army.gid, UnitType::Archer, 5, now);
        other_unit.set_stamina(0.2, now);
        let tx = db.begin().unwrap();
        database::create_unit(&tx, &other_unit).unwrap();
        tx.commit().unwrap();

        let msg = command(
            "merge",
            army_gid,
            serde_json::json!({"armies": [army_gid, second_army.gid]}),
        );
        let result = handle_merge(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "success");
        assert_eq!(result["army"]["units"][0]["count"], 15);
        assert!(db.list_armies_for_bot(bot_gid).unwrap().iter().all(|a| a.gid != second_army.gid));
    }

    #[test]
    fn merge_requires_at_least_two_distinct_armies() {
        let (mut db, bot_gid, army_gid) = setup();
        let msg = command("merge", army_gid, serde_json::json!({"armies": [army_gid]}));
        let result = handle_merge(&mut db, bot_gid, &msg, &EngineConfig::default());

        assert_eq!(result["status"], "error");
    }
}
