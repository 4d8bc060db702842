//! The three fixed-rate supervision loops (§4.4): restart, heartbeat, and
//! state-update. Each runs as a sibling task; a crash in one is logged and
//! does not stop the others (the supervising task group in `main.rs`
//! catches panics at the `tokio::spawn` boundary).

pub mod heartbeat;
pub mod restart;
pub mod scheduler;
pub mod snapshot;
pub mod state_update;
