//! Game state model — entities, derived attributes, and their wire dumps.
//!
//! Every struct here mirrors a row in the `state` database. Derived values
//! (stamina, bot state, heartbeat age, uptime) are never stored; they are
//! computed on read from stored columns plus the current time, and
//! re-snapshotted only at the moment of a write (see [`Unit::set_stamina`]).

mod entities;
mod types;

pub use entities::{Army, ArmyDump, Bot, BotDump, BotMemory, Location, LocationDump, Unit, UnitDump, User};
pub use types::{BotState, MessageType, TerrainType, UnitType};
