//! Type definitions for the rows read out of the Signal Desktop message store.
//!
//! Storage format: SQLCipher-encrypted SQLite (`sql/db.sqlite`), keyed by the
//! hex `key` found in the profile's `config.json`.
//!
//! Tables read:
//! ```sql
//! SELECT type, id, e164, name, profileName, members FROM conversations;
//! SELECT json, conversationId FROM messages ORDER BY sent_at;
//! ```
//!
//! Message bodies live in the `json` column as a camelCase JSON document.
//! Only the fields the export needs are modelled; everything else is ignored.

use serde::{Deserialize, Deserializer};

use crate::error::ExportError;

// ---------------------------------------------------------------------------
// Conversation rows
// ---------------------------------------------------------------------------

/// One row of the `conversations` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationRow {
    /// `"private"` or `"group"`.
    pub kind: String,
    pub id: String,
    /// Phone number in E.164 form, private conversations only.
    pub e164: Option<String>,
    pub name: Option<String>,
    pub profile_name: Option<String>,
    /// Space-separated conversation ids of the group members.
    pub members: Option<String>,
}

impl ConversationRow {
    pub fn is_group(&self) -> bool {
        self.kind == "group"
    }
}

/// One row of the `messages` table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageRow {
    pub json: String,
    pub conversation_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Message payloads
// ---------------------------------------------------------------------------

/// The decoded `json` column of a message row.
///
/// Payloads that are not JSON objects, or whose fields have the wrong types,
/// are quarantined as `Malformed` here so nothing downstream has to cope with
/// partially typed data.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Message(RawMessage),
    Malformed(String),
}

impl Payload {
    pub fn parse(json: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => return Payload::Malformed(format!("invalid JSON: {}", e)),
        };
        if !value.is_object() {
            return Payload::Malformed(format!("expected an object, got {}", kind_of(&value)));
        }
        match serde_json::from_value::<RawMessage>(value) {
            Ok(msg) => Payload::Message(msg),
            Err(e) => Payload::Malformed(e.to_string()),
        }
    }

    pub fn into_result(self) -> Result<RawMessage, ExportError> {
        match self {
            Payload::Message(msg) => Ok(msg),
            Payload::Malformed(reason) => Err(ExportError::MalformedPayload { reason }),
        }
    }
}

fn kind_of(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Message fields used by the export.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMessage {
    pub id: Option<String>,
    pub conversation_id: Option<String>,
    /// `"incoming"`, `"outgoing"`, or one of several service types.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub body: Option<String>,
    #[serde(deserialize_with = "millis")]
    pub timestamp: Option<i64>,
    #[serde(rename = "sent_at", deserialize_with = "millis")]
    pub sent_at: Option<i64>,
    /// Sender phone number for incoming messages.
    pub source: Option<String>,
    pub attachments: Option<Vec<RawAttachment>>,
}

/// Attachment metadata embedded in a message payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawAttachment {
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    /// Path relative to `attachments.noindex/`.
    pub path: Option<String>,
}

/// Millisecond timestamps are usually integers but older clients wrote floats.
fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<serde_json::Number>::deserialize(deserializer)?;
    Ok(value.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))))
}
