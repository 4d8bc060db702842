//! Command router (§4.6) — tag-dispatched handlers that validate bot
//! commands against authoritative game state and mutate it transactionally.

pub mod army;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::state::Database;
use crate::wire::Message;

/// A handler validates a `command` message against the store and returns
/// either success or error payload fields (§4.6's two standardized shapes);
/// `response_to` and message framing are filled in by the router.
pub type Handler = Arc<dyn Fn(&mut Database, Uuid, &Message) -> serde_json::Value + Send + Sync>;

/// `{command_name -> handler}` plus child routers, exactly mirroring the
/// original's `routes` dict + `routers` list (§4.6, grounded on
/// `codeborn_engine/commands/__init__.py`'s `Router`).
#[derive(Default, Clone)]
pub struct Router {
    routes: HashMap<&'static str, Handler>,
    children: Vec<Router>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, name: &'static str, handler: Handler) -> Self {
        self.routes.insert(name, handler);
        self
    }

    pub fn nest(mut self, child: Router) -> Self {
        self.children.push(child);
        self
    }

    /// Look up `payload.command`; on hit, invoke the handler. On miss,
    /// recurse into children. Returns `None` if no route matches anywhere
    /// in the tree (§4.6, §4.5 — the dispatcher logs a warning in that case).
    pub fn dispatch(&self, db: &mut Database, bot_gid: Uuid, message: &Message) -> Option<serde_json::Value> {
        let command = message.payload.get("command")?.as_str()?;
        if let Some(handler) = self.routes.get(command) {
            return Some(handler(db, bot_gid, message));
        }
        for child in &self.children {
            if let Some(result) = child.dispatch(db, bot_gid, message) {
                return Some(result);
            }
        }
        None
    }
}

/// The root router wired up at startup: the `army` sub-router mounted
/// directly (the spec names no other command families, but the nested
/// shape is what grounds extensibility — see `codeborn_engine`'s `routers`
/// list composing feature-specific routers under one root).
pub fn root_router(config: EngineConfig) -> Router {
    Router::new().nest(army::router(config))
}

/// Build a success payload per §4.6's standardized shape.
pub fn success(fields: serde_json::Value) -> serde_json::Value {
    let mut obj = serde_json::Map::new();
    obj.insert("status".into(), serde_json::Value::String("success".into()));
    if let serde_json::Value::Object(extra) = fields {
        obj.extend(extra);
    }
    serde_json::Value::Object(obj)
}

/// Build an error payload per §4.6's standardized shape.
pub fn error(reason: impl Into<String>) -> serde_json::Value {
    serde_json::json!({ "status": "error", "reason": reason.into() })
}

/// Log an unmatched command (§4.5, §4.6, §7 "Protocol") — persisted
/// already by the dispatcher; this only warns, it never mutates state.
pub fn log_unmatched(bot_gid: Uuid, message: &Message) {
    warn!(bot_gid = %bot_gid, payload = %message.payload, "no command route matched, ignoring");
}
