use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::StoreData;

/// the command that asks the server for its whole mapping
pub const GET_DATA: &str = "get data";

/// the command the client uses for upserts. Any command other than [`GET_DATA`] is
/// treated the same way.
pub const ADD_DATA: &str = "add data";

/// The message a client sends to the server: `{"command": ..., "data": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// what the server should do
    pub command: String,
    /// the key/values to merge into the store, `null` for none
    pub data: Option<StoreData>,
}

impl Envelope {
    /// builds an envelope for `command` carrying `data`
    pub fn new(command: impl Into<String>, data: Option<StoreData>) -> Self {
        Envelope {
            command: command.into(),
            data,
        }
    }

    /// true if this is a [`GET_DATA`] request
    pub fn is_get_data(&self) -> bool {
        self.command == GET_DATA
    }
}

/// The result of a single client call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// the server's response
    Ok(Value),
    /// the exchange failed. Whether the server could not be reached or the connection broke
    /// mid-transfer is only logged, not reported.
    Failed,
}

impl Reply {
    /// the response value, `None` if the call failed
    pub fn ok(self) -> Option<Value> {
        match self {
            Reply::Ok(value) => Some(value),
            Reply::Failed => None,
        }
    }

    /// true if the call failed
    pub fn is_failed(&self) -> bool {
        matches!(self, Reply::Failed)
    }
}
