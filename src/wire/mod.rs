//! Newline-delimited JSON wire protocol exchanged with bot subprocesses
//! (§4.1). One [`Message`] per line, UTF-8, terminated by `\n`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::model::MessageType;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message line contained no content")]
    Empty,
}

/// A single protocol message, read or written as one line of JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default = "Uuid::new_v4")]
    pub gid: Uuid,
    pub bot_id: Uuid,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default = "Utc::now")]
    pub datetime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_to: Option<Uuid>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Message {
    /// Build a new outgoing message stamped with the current time.
    pub fn new(bot_id: Uuid, message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            gid: Uuid::new_v4(),
            bot_id,
            message_type,
            datetime: Utc::now(),
            response_to: None,
            payload,
        }
    }

    /// Build a reply to `request`, carrying its gid in `response_to`.
    pub fn reply_to(request: &Message, message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            gid: Uuid::new_v4(),
            bot_id: request.bot_id,
            message_type,
            datetime: Utc::now(),
            response_to: Some(request.gid),
            payload,
        }
    }

    /// Parse one line of raw bytes (minus its trailing newline) into a message.
    pub fn from_line(bot_id: Uuid, line: &[u8]) -> Result<Self, WireError> {
        let trimmed = trim_line(line);
        if trimmed.is_empty() {
            return Err(WireError::Empty);
        }
        let mut value: serde_json::Value = serde_json::from_slice(trimmed)?;
        if let Some(obj) = value.as_object_mut() {
            // The connection-owner id always wins: a bot must never be able to
            // put its own `bot_id` on the wire and impersonate another bot.
            obj.insert("bot_id".to_string(), serde_json::Value::String(bot_id.to_string()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize into a newline-terminated line ready to write to a child's stdin.
    pub fn to_line(&self) -> Result<Vec<u8>, WireError> {
        let mut bytes = serde_json::to_vec(self)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
