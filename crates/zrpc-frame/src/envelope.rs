use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FrameError, Result};

/// Protocol version carried in every envelope header.
pub const PROTOCOL_VERSION: u32 = 1;

/// Per-connection identifier tying a request to all of its response frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error payload carried in the first slot of a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Error classification, e.g. `TimeoutExpired` or `MethodNotFound`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-readable message, preserved verbatim.
    pub message: String,
}

impl WireError {
    /// An unnamed error carrying only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: None,
            message: message.into(),
        }
    }

    /// A named error.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            message: message.into(),
        }
    }

    /// Rebuild an error from the value found on the wire.
    ///
    /// Peers may send a bare string, an object with `message` (and
    /// optionally `name`), or anything else, which is rendered as text.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(message) => Self::new(message.clone()),
            Value::Object(map) => {
                let message = match map.get("message") {
                    Some(Value::String(message)) => message.clone(),
                    Some(other) => other.to_string(),
                    None => value.to_string(),
                };
                let name = map
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Self { name, message }
            }
            other => Self::new(other.to_string()),
        }
    }

    /// Convert into the wire value.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for WireError {}

impl From<&str> for WireError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for WireError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// One protocol message unit.
///
/// Requests carry an `event` (the procedure name) and the call arguments.
/// Responses carry no event and `args == [error, result]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: CorrelationId,
    pub event: Option<String>,
    pub args: Vec<Value>,
    /// `Some(false)` marks the terminal envelope of a call. Absent means more.
    pub more: Option<bool>,
}

impl Envelope {
    /// Build a request envelope.
    pub fn request(id: CorrelationId, event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            event: Some(event.into()),
            args,
            more: None,
        }
    }

    /// Build a success response.
    pub fn reply(id: CorrelationId, result: Value, more: bool) -> Self {
        Self {
            id,
            event: None,
            args: vec![Value::Null, result],
            more: Some(more),
        }
    }

    /// Build a terminal error response.
    pub fn error(id: CorrelationId, error: &WireError) -> Self {
        Self {
            id,
            event: None,
            args: vec![error.to_value(), Value::Null],
            more: Some(false),
        }
    }

    /// The empty terminal response used to close a call that was left open.
    pub fn terminal(id: CorrelationId) -> Self {
        Self::reply(id, Value::Null, false)
    }

    /// Whether this envelope opens a call.
    pub fn is_request(&self) -> bool {
        self.event.is_some()
    }

    /// Whether more envelopes follow for this call. Absent counts as `true`.
    pub fn has_more(&self) -> bool {
        self.more.unwrap_or(true)
    }

    /// Split a response into its error and result slots.
    pub fn into_response(self) -> (Option<WireError>, Value) {
        let mut args = self.args.into_iter();
        let error = args.next().unwrap_or(Value::Null);
        let result = args.next().unwrap_or(Value::Null);
        let error = (!error.is_null()).then(|| WireError::from_value(&error));
        (error, result)
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    message_id: CorrelationId,
    v: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    more: Option<bool>,
}

#[derive(Serialize, Deserialize)]
struct WireEnvelope(Header, Option<String>, Vec<Value>);

/// Serialize an envelope to its JSON wire form `[header, event, args]`.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes> {
    let wire = WireEnvelope(
        Header {
            message_id: envelope.id,
            v: PROTOCOL_VERSION,
            more: envelope.more,
        },
        envelope.event.clone(),
        envelope.args.clone(),
    );
    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(|err| FrameError::MalformedEnvelope(err.to_string()))
}

/// Parse an envelope from its JSON wire form.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope> {
    let WireEnvelope(header, event, args) = serde_json::from_slice(bytes)
        .map_err(|err| FrameError::MalformedEnvelope(err.to_string()))?;

    if header.v != PROTOCOL_VERSION {
        return Err(FrameError::UnsupportedVersion(header.v));
    }

    Ok(Envelope {
        id: header.message_id,
        event,
        args,
        more: header.more,
    })
}
