//! Wire frame model and JSON codec for the Wokwi simulation websocket.
//!
//! This crate owns the wire representation used by both the client library
//! and the in-process test server. Every frame is a JSON text object carrying
//! a `type` discriminator; command parameters, results and event payloads stay
//! flexible (`serde_json::Value`) because their schemas belong to the remote
//! simulator.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// The only handshake protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Message used when an error response carries no message of its own.
pub const UNKNOWN_SERVER_ERROR: &str = "Unknown server error";

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON, or a known frame type has the wrong shape.
    #[error("failed to decode JSON frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The JSON value is not an object with a string `type` field.
    #[error("frame has no `type` field")]
    MissingType,
    /// The `type` field names a frame kind this client does not know.
    #[error("unknown frame type: {0}")]
    UnknownType(String),
}

/// Discriminator carried in the `type` field of every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// Server greeting, always the first frame on a connection.
    Hello,
    /// Client request.
    Command,
    /// Server reply correlated to a command by `id`.
    Response,
    /// Unsolicited server push.
    Event,
    /// Fatal server-side error for the whole connection.
    Error,
}

impl FrameType {
    /// Wire spelling of this frame type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Command => "command",
            Self::Response => "response",
            Self::Event => "event",
            Self::Error => "error",
        }
    }

    /// Parse a frame type from its wire spelling.
    fn parse(value: &str) -> Result<Self, CodecError> {
        match value {
            "hello" => Ok(Self::Hello),
            "command" => Ok(Self::Command),
            "response" => Ok(Self::Response),
            "event" => Ok(Self::Event),
            "error" => Ok(Self::Error),
            other => Err(CodecError::UnknownType(other.to_owned())),
        }
    }
}

/// Server greeting sent right after the websocket upgrade.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub protocol_version: u32,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
}

/// A client request. `id` correlates the eventual [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub params: Value,
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
}

impl Command {
    #[must_use]
    pub fn new(id: impl Into<String>, command: impl Into<String>, params: Value) -> Self {
        Self { command: command.into(), params, id: id.into() }
    }
}

/// Server reply to a [`Command`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub command: String,
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: bool,
}

/// Error payload carried in `result` when a response has `error: true`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub code: i64,
    pub message: String,
}

impl Response {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn ok(command: &Command, result: Value) -> Self {
        Self { command: command.command.clone(), id: command.id.clone(), result, error: false }
    }

    /// Error response carrying `{code, message}`.
    #[must_use]
    pub fn failed(command: &Command, code: i64, message: impl Into<String>) -> Self {
        let result = serde_json::json!({ "code": code, "message": message.into() });
        Self { command: command.command.clone(), id: command.id.clone(), result, error: true }
    }

    /// The server-supplied error, if this response reports one.
    ///
    /// Missing fields fall back to code `-1` and [`UNKNOWN_SERVER_ERROR`].
    #[must_use]
    pub fn error_result(&self) -> Option<ErrorResult> {
        if !self.error {
            return None;
        }
        let code = self.result.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = self
            .result
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_SERVER_ERROR)
            .to_owned();
        Some(ErrorResult { code, message })
    }
}

/// Unsolicited push from the simulator (serial data, pin change, pause).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    /// Simulation time in nanoseconds when the event fired.
    #[serde(default)]
    pub nanos: f64,
    /// Whether the simulation was paused when the event fired.
    #[serde(default)]
    pub paused: bool,
}

/// Connection-level failure reported by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub message: String,
}

/// A single message on the simulation websocket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Hello(Hello),
    Command(Command),
    Response(Response),
    Event(Event),
    Error(ErrorFrame),
}

impl Frame {
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Hello(_) => FrameType::Hello,
            Self::Command(_) => FrameType::Command,
            Self::Response(_) => FrameType::Response,
            Self::Event(_) => FrameType::Event,
            Self::Error(_) => FrameType::Error,
        }
    }
}

/// Encode a frame as JSON text.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    // Frames hold only string-keyed JSON, so serialization cannot fail.
    serde_json::to_string(frame).unwrap_or_default()
}

/// Decode JSON text into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Json`] for malformed JSON or a mis-shaped frame,
/// [`CodecError::MissingType`] when there is no string `type` field, and
/// [`CodecError::UnknownType`] for an unrecognised `type`.
pub fn decode_frame(text: &str) -> Result<Frame, CodecError> {
    let value = serde_json::from_str::<Value>(text)?;
    let frame_type = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)
        .and_then(FrameType::parse)?;

    let frame = match frame_type {
        FrameType::Hello => Frame::Hello(serde_json::from_value(value)?),
        FrameType::Command => Frame::Command(serde_json::from_value(value)?),
        FrameType::Response => Frame::Response(serde_json::from_value(value)?),
        FrameType::Event => Frame::Event(serde_json::from_value(value)?),
        FrameType::Error => Frame::Error(serde_json::from_value(value)?),
    };
    Ok(frame)
}

/// Accept correlation ids sent either as JSON strings or as numbers.
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid frame id: {other}"))),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
