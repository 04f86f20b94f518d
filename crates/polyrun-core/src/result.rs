//! Final outcome of a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Outcome of one execution request. Produced exactly once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl ExecutionResult {
    pub fn success(duration: Duration) -> Self {
        Self {
            success: true,
            duration_ms: millis(duration),
            error: None,
            kind: None,
        }
    }

    /// Fold an error into a failed result.
    pub fn failure(duration: Duration, error: &Error) -> Self {
        Self {
            success: false,
            duration_ms: millis(duration),
            error: Some(error.to_string()),
            kind: Some(error.kind()),
        }
    }

    /// Failure reported by user code, with the host's message.
    pub fn runtime_failure(duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            success: false,
            duration_ms,
            error: Some(message.into()),
            kind: Some(ErrorKind::Runtime),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == Some(ErrorKind::Timeout)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
