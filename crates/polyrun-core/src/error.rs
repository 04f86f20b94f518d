//! Error types for polyrun-core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::LanguageId;

/// Result type for polyrun-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in polyrun-core.
#[derive(Debug, Error)]
pub enum Error {
    /// The request was rejected before any host was launched.
    #[error("validation error: {0}")]
    Validation(String),

    /// The language id does not name an enabled language.
    #[error("unknown language: {0}")]
    UnknownLanguage(String),

    /// Another run is still in flight.
    #[error("a run is already in progress")]
    Busy,

    /// The isolated host could not be created.
    #[error("failed to start {language} host: {message}")]
    Initialization {
        language: LanguageId,
        message: String,
    },

    /// User code failed inside the host, or the host died mid-run.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// No COMPLETE message arrived within the configured window.
    #[error("execution timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The run was stopped by the caller.
    #[error("execution cancelled")]
    Cancelled,

    /// A host frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Communication with the host process failed.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of a failed run, as seen by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Concurrency,
    Initialization,
    Runtime,
    Timeout,
    Cancelled,
    Protocol,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::UnknownLanguage(_) | Error::Config(_) => {
                ErrorKind::Validation
            }
            Error::Busy => ErrorKind::Concurrency,
            Error::Initialization { .. } => ErrorKind::Initialization,
            Error::Runtime(_) | Error::Ipc(_) | Error::Io(_) => ErrorKind::Runtime,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Protocol(_) | Error::Json(_) => ErrorKind::Protocol,
        }
    }

    /// Render the error together with a recovery hint, when one exists.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Busy => Some("wait for the current run to finish or stop it first"),
            Error::UnknownLanguage(_) => Some("run `polyrun languages` to list enabled languages"),
            Error::Initialization { .. } => Some(
                "make sure polyrun-host is built and reachable, or set POLYRUN_HOST_PATH",
            ),
            Error::Timeout(_) => Some("raise the timeout with --timeout or POLYRUN_TIMEOUT_<LANG>"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::Busy.kind(), ErrorKind::Concurrency);
        assert_eq!(
            Error::UnknownLanguage("cobol".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            Error::Timeout(Duration::from_secs(3)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(Error::Runtime("boom".into()).kind(), ErrorKind::Runtime);
    }

    #[test]
    fn test_timeout_message_is_distinct() {
        let msg = Error::Timeout(Duration::from_secs(15)).to_string();
        assert_eq!(msg, "execution timed out after 15s");
    }

    #[test]
    fn test_with_hint() {
        let rendered = Error::Busy.with_hint();
        assert!(rendered.starts_with("a run is already in progress"));
        assert!(rendered.contains("hint:"));

        let plain = Error::Runtime("x".into()).with_hint();
        assert!(!plain.contains("hint:"));
    }
}
