//! Protocol message definitions
//!
//! Control frames arrive on the WebSocket as flat key=value pairs, either
//! form-encoded (`event=sub&channel=chat&seq=3`) or as a flat JSON object.
//! Replies on the socket and responses of the HTTP interface are JSON.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Code carried by successful replies
pub const CODE_OK: i32 = 0;

/// Code carried by every error reply
pub const CODE_ERROR: i32 = -1;

/// Correlation id used when a frame carries no `seq`
pub const DEFAULT_SEQ: &str = "0";

pub const EVENT_PING: &str = "ping";
pub const EVENT_PONG: &str = "pong";
pub const EVENT_SUB: &str = "sub";
pub const EVENT_UNSUB: &str = "unsub";
pub const EVENT_ERROR: &str = "error";

pub const MISS_EVENT: &str = "miss event";
pub const MISS_CHANNEL: &str = "miss channel";

// ============================================================================
// Error Types
// ============================================================================

/// Errors decoding an inbound control frame
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid frame: expected a flat JSON object")]
    NotAnObject,
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Caller-contract violations on the HTTP interface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("params {0} require")]
    MissingParam(&'static str),

    #[error("params {0} invalid")]
    InvalidParam(&'static str),

    #[error("invalid request")]
    InvalidRequest,
}

// ============================================================================
// Key/value decoding
// ============================================================================

/// Flat key/value pairs decoded from a frame or request body
///
/// When a key repeats, the first value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, String>);

impl Params {
    /// Decode `application/x-www-form-urlencoded` pairs
    pub fn from_form(input: &str) -> Self {
        let mut pairs = HashMap::new();
        for (key, value) in url::form_urlencoded::parse(input.trim().as_bytes()) {
            pairs
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
        Self(pairs)
    }

    /// Decode a flat JSON object; strings, numbers and booleans are kept
    pub fn from_json(input: &str) -> ProtocolResult<Self> {
        let value: serde_json::Value = serde_json::from_str(input)?;
        let serde_json::Value::Object(object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        let pairs = object
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key, text))
            })
            .collect();
        Ok(Self(pairs))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Fetch a parameter the caller must supply
    pub fn require(&self, key: &'static str) -> Result<&str, ApiError> {
        self.get(key).ok_or(ApiError::MissingParam(key))
    }
}

// ============================================================================
// Client Messages
// ============================================================================

/// An inbound control message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFrame {
    /// What the client asks for (`ping`, `sub`, `unsub`)
    pub event: Option<String>,
    /// Correlation id echoed in the reply
    pub seq: Option<String>,
    /// Target room for `sub`/`unsub`
    pub channel: Option<String>,
}

impl ControlFrame {
    /// Decode a text frame; JSON if it starts with `{`, form-encoded otherwise
    pub fn parse(text: &str) -> ProtocolResult<Self> {
        let params = if text.trim_start().starts_with('{') {
            Params::from_json(text)?
        } else {
            Params::from_form(text)
        };
        Ok(Self::from_params(&params))
    }

    pub fn from_params(params: &Params) -> Self {
        Self {
            event: params.get("event").map(str::to_owned),
            seq: params.get("seq").map(str::to_owned),
            channel: params.get("channel").map(str::to_owned),
        }
    }

    /// The correlation id to echo, `"0"` when absent
    pub fn seq(&self) -> &str {
        self.seq.as_deref().unwrap_or(DEFAULT_SEQ)
    }

    pub fn kind(&self) -> Option<ControlEvent> {
        self.event.as_deref().map(ControlEvent::from_name)
    }
}

/// Control events understood by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    Ping,
    Sub,
    Unsub,
    /// Anything else; ignored without a reply
    Unknown(String),
}

impl ControlEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            EVENT_PING => ControlEvent::Ping,
            EVENT_SUB => ControlEvent::Sub,
            EVENT_UNSUB => ControlEvent::Unsub,
            other => ControlEvent::Unknown(other.to_string()),
        }
    }
}

// ============================================================================
// Server Messages
// ============================================================================

/// Reply sent back on the socket that issued a control frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlReply {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub code: i32,
    pub message: String,
    pub seq: String,
}

impl ControlReply {
    pub fn pong(seq: impl Into<String>) -> Self {
        Self {
            event: EVENT_PONG.to_string(),
            channel: None,
            code: CODE_OK,
            message: String::new(),
            seq: seq.into(),
        }
    }

    pub fn error(message: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            event: EVENT_ERROR.to_string(),
            channel: None,
            code: CODE_ERROR,
            message: message.into(),
            seq: seq.into(),
        }
    }

    pub fn subscribed(channel: impl Into<String>, seq: impl Into<String>) -> Self {
        Self::ack(EVENT_SUB, channel, seq)
    }

    pub fn unsubscribed(channel: impl Into<String>, seq: impl Into<String>) -> Self {
        Self::ack(EVENT_UNSUB, channel, seq)
    }

    fn ack(event: &str, channel: impl Into<String>, seq: impl Into<String>) -> Self {
        Self {
            event: event.to_string(),
            channel: Some(channel.into()),
            code: CODE_OK,
            message: String::new(),
            seq: seq.into(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<ProtocolError> for ControlReply {
    fn from(err: ProtocolError) -> Self {
        ControlReply::error(err.to_string(), DEFAULT_SEQ)
    }
}

/// Response body of the HTTP push/broadcast interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiReply {
    pub code: i32,
    pub message: String,
    /// Recipients the message was handed to, when delivery reporting is on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<usize>,
}

impl ApiReply {
    pub fn ok() -> Self {
        Self {
            code: CODE_OK,
            message: "ok".to_string(),
            delivered: None,
        }
    }

    pub fn ok_with_delivered(delivered: usize) -> Self {
        Self {
            delivered: Some(delivered),
            ..Self::ok()
        }
    }
}

impl From<ApiError> for ApiReply {
    fn from(err: ApiError) -> Self {
        Self {
            code: CODE_ERROR,
            message: err.to_string(),
            delivered: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
