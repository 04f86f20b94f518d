//! Host protocol messages.
//!
//! One JSON object per line over the host's stdin/stdout. Every frame carries
//! a `type` of the form `<PREFIX>_<KIND>` (or `EXECUTE_<PREFIX>` for the single
//! request) and the run's correlation `token`:
//!
//! ```text
//! host -> orchestrator   {"type":"PY_READY","token":"..."}
//!                        {"type":"PY_OUTPUT","token":"...","level":"log","data":["1"]}
//!                        {"type":"PY_COMPLETE","token":"...","success":true,"durationMs":12}
//! orchestrator -> host   {"type":"EXECUTE_PY","token":"...","code":"print(1)"}
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::output::{ConsoleLevel, OutputEvent};

/// Per-run opaque value that tells this run's frames apart from stale ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    /// Generate a fresh token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message sent from a host to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostMessage {
    /// The host is up and waiting for code.
    Ready,

    /// Warm-up progress before user code runs.
    Loading { message: String },

    /// A console line.
    Output {
        #[serde(default)]
        level: ConsoleLevel,
        #[serde(default)]
        data: Vec<Value>,
    },

    /// Rows produced by a query.
    Table {
        columns: Vec<String>,
        #[serde(default)]
        values: Vec<Vec<Value>>,
    },

    /// An error inside the host. The run continues until COMPLETE.
    Error { message: String },

    /// The run is over.
    Complete {
        success: bool,
        #[serde(rename = "durationMs", default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl HostMessage {
    /// Protocol kind without the language prefix.
    pub fn kind(&self) -> &'static str {
        match self {
            HostMessage::Ready => "READY",
            HostMessage::Loading { .. } => "LOADING",
            HostMessage::Output { .. } => "OUTPUT",
            HostMessage::Table { .. } => "TABLE",
            HostMessage::Error { .. } => "ERROR",
            HostMessage::Complete { .. } => "COMPLETE",
        }
    }

    /// The output event this message relays, if any.
    pub fn to_event(&self) -> Option<OutputEvent> {
        match self {
            HostMessage::Loading { message } => Some(OutputEvent::Info {
                message: message.clone(),
            }),
            HostMessage::Output { level, data } => Some(OutputEvent::Output {
                console: *level,
                data: data.clone(),
                truncated: false,
            }),
            HostMessage::Table { columns, values } => Some(OutputEvent::Table {
                columns: columns.clone(),
                values: values.clone(),
            }),
            HostMessage::Error { message } => Some(OutputEvent::Error {
                message: message.clone(),
            }),
            HostMessage::Ready | HostMessage::Complete { .. } => None,
        }
    }

    /// Encode as one protocol line (without the trailing newline).
    pub fn encode(&self, prefix: &str, token: &CorrelationToken) -> Result<String> {
        let mut body = match serde_json::to_value(self)? {
            Value::Object(map) => map,
            other => {
                return Err(Error::Protocol(format!(
                    "host message encoded to non-object: {other}"
                )));
            }
        };
        body.remove("kind");
        encode_frame(format!("{prefix}_{}", self.kind()), token, body)
    }

    /// Decode one protocol line for the given language prefix.
    pub fn decode(line: &str, prefix: &str) -> Result<(CorrelationToken, HostMessage)> {
        let frame = RawFrame::parse(line)?;
        let kind = frame
            .kind
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('_'))
            .ok_or_else(|| {
                Error::Protocol(format!(
                    "frame type '{}' does not carry prefix '{prefix}'",
                    frame.kind
                ))
            })?;

        let mut body = frame.body;
        body.insert("kind".to_string(), Value::String(kind.to_string()));
        let message = serde_json::from_value(Value::Object(body))
            .map_err(|e| Error::Protocol(format!("malformed {} frame: {e}", frame.kind)))?;
        Ok((frame.token, message))
    }
}

/// The single request sent to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub code: String,
}

impl ExecuteRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    /// Encode as `EXECUTE_<PREFIX>`.
    pub fn encode(&self, prefix: &str, token: &CorrelationToken) -> Result<String> {
        let mut body = Map::new();
        body.insert("code".to_string(), Value::String(self.code.clone()));
        encode_frame(format!("EXECUTE_{prefix}"), token, body)
    }

    /// Decode an `EXECUTE_<PREFIX>` line.
    pub fn decode(line: &str, prefix: &str) -> Result<(CorrelationToken, ExecuteRequest)> {
        let frame = RawFrame::parse(line)?;
        let expected = format!("EXECUTE_{prefix}");
        if frame.kind != expected {
            return Err(Error::Protocol(format!(
                "expected {expected}, got {}",
                frame.kind
            )));
        }
        let request = serde_json::from_value(Value::Object(frame.body))
            .map_err(|e| Error::Protocol(format!("malformed {expected} frame: {e}")))?;
        Ok((frame.token, request))
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    token: CorrelationToken,
    #[serde(flatten)]
    body: Map<String, Value>,
}

impl RawFrame {
    fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Protocol(format!("unreadable frame: {e}")))
    }
}

fn encode_frame(kind: String, token: &CorrelationToken, body: Map<String, Value>) -> Result<String> {
    let mut frame = Map::with_capacity(body.len() + 2);
    frame.insert("type".to_string(), Value::String(kind));
    frame.insert("token".to_string(), Value::String(token.to_string()));
    frame.extend(body);
    Ok(serde_json::to_string(&Value::Object(frame))?)
}
