//! Wire protocol between wacheck and the automation bridge
//!
//! Newline-delimited JSON over the bridge's stdin/stdout. Requests carry an
//! `id` that the matching response echoes; events carry an `event` tag and
//! no `id`.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use wacheck_core::{ClientSignal, Identifier};

/// Suffix the network uses for individual chats
const CHAT_ID_SUFFIX: &str = "@c.us";

/// Bridge methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Method {
    #[serde(rename = "isRegisteredUser")]
    IsRegisteredUser,
    #[serde(rename = "getContactById")]
    GetContactById,
    #[serde(rename = "getProfilePicUrl")]
    GetProfilePicUrl,
    #[serde(rename = "destroy")]
    Destroy,
}

/// Parameters addressing a single chat
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatParams {
    #[serde(rename = "chatId")]
    pub chat_id: String,
}

impl ChatParams {
    pub fn for_identifier(id: &Identifier) -> Self {
        Self {
            chat_id: chat_id(id),
        }
    }
}

/// Request sent to the bridge
#[derive(Debug, Clone, Serialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<ChatParams>,
}

/// Lifecycle events pushed by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Pairing code to show to the operator
    Qr { data: String },
    Authenticated,
    Ready,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
}

impl From<BridgeEvent> for ClientSignal {
    fn from(event: BridgeEvent) -> Self {
        match event {
            BridgeEvent::Qr { data } => ClientSignal::CredentialRequired { code: data },
            BridgeEvent::Authenticated => ClientSignal::Authenticated,
            BridgeEvent::Ready => ClientSignal::Ready,
            BridgeEvent::AuthFailure { message } => ClientSignal::AuthFailure { message },
            BridgeEvent::Disconnected { reason } => ClientSignal::Disconnected { reason },
        }
    }
}

/// Any line the bridge writes
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum BridgeMessage {
    /// Reply to a request (has `id`)
    Response {
        id: u64,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    /// Lifecycle event (has `event`)
    Event(BridgeEvent),
    /// Anything else; logged and skipped
    Unknown(Value),
}

/// Address of an individual chat for an identifier
pub fn chat_id(id: &Identifier) -> String {
    format!("{}{}", id.as_str(), CHAT_ID_SUFFIX)
}

/// Encode a message as a JSON line (with trailing newline)
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let mut json = serde_json::to_vec(msg)?;
    json.push(b'\n');
    Ok(json)
}

/// Decode a message from a JSON line
pub fn decode<T: DeserializeOwned>(line: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(line)?)
}
