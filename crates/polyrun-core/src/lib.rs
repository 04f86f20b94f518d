//! Core engine for Polyrun sandboxed polyglot code execution.
//!
//! This crate provides:
//! - Execution channels: one isolated host per run, with timeout and teardown
//! - Language runners for JavaScript, TypeScript, Python, SQL, Lua and Markdown
//! - A lazily populated language registry
//! - The [`RunnerManager`] entry point with single-flight runs and an output cap
//! - The JSON-lines host protocol shared with `polyrun-host`

pub mod channel;
pub mod config;
pub mod error;
pub mod language;
pub mod manager;
pub mod output;
pub mod protocol;
pub mod registry;
pub mod result;
pub mod runner;
pub mod testing;

pub use channel::{
    ChannelProfile, ChannelState, ExecutionChannel, HostHandle, HostLauncher, HostLink,
    HostSession, HostSpec, ProcessLauncher,
};
pub use config::RunnerConfig;
pub use error::{Error, ErrorKind, Result};
pub use language::LanguageId;
pub use manager::{RunCallbacks, RunnerManager};
pub use output::{ConsoleLevel, DEFAULT_OUTPUT_CAP, OutputEvent, OutputSink};
pub use protocol::{CorrelationToken, ExecuteRequest, HostMessage};
pub use registry::LanguageRegistry;
pub use result::ExecutionResult;
pub use runner::{ChannelRunner, LanguageRunner, MarkdownRunner, example_code};
