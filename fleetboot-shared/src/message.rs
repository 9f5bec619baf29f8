//! Wire messages exchanged over the capability channel.
//!
//! A message travels as a single line starting with `~` followed by a
//! JSON object carrying a `type` field. Any other line on the channel is
//! treated as plain worker output and passed through to the log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::FleetbootResult;

/// Prefix marking a line as a framed message rather than worker output.
pub const MESSAGE_PREFIX: char = '~';

/// One message on the capability channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type; the peer ignores types it does not know.
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Type-specific properties.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>) -> Self {
        Self {
            msg_type: msg_type.into(),
            properties: Map::new(),
        }
    }

    /// Attach a property, builder-style.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Encode to one wire line (without the trailing newline).
    pub fn to_line(&self) -> FleetbootResult<String> {
        Ok(format!("{}{}", MESSAGE_PREFIX, serde_json::to_string(self)?))
    }

    /// Parse a wire line. Returns `None` for anything that is not a
    /// well-formed framed message, including plain worker output.
    pub fn parse_line(line: &str) -> Option<Message> {
        let body = line.strip_prefix(MESSAGE_PREFIX)?;
        serde_json::from_str(body).ok()
    }
}
