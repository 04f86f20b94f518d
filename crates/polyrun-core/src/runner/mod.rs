//! Language runners.
//!
//! A runner adapts one language to the common execution contract. Most
//! runners are a [`ChannelRunner`]: a channel profile (protocol prefix and
//! timeout) plus a launcher. [`MarkdownRunner`] has no host at all and renders
//! synchronously; the contract only fixes the result shape, not isolation.
//!
//! # Module Structure
//!
//! - `channel_runner` - runners backed by an isolated host
//! - `markdown` - hostless markdown preview
//! - `samples` - example programs per language
//! - `syntax` - cheap pre-launch syntax checks

mod channel_runner;
mod markdown;
mod samples;
mod syntax;

use async_trait::async_trait;

use crate::error::Result;
use crate::language::LanguageId;
use crate::output::OutputSink;
use crate::result::ExecutionResult;

pub use channel_runner::ChannelRunner;
pub use markdown::MarkdownRunner;
pub use samples::example_code;
pub use syntax::{SyntaxRules, check_syntax};

/// Contract every language adapter implements.
#[async_trait]
pub trait LanguageRunner: Send + Sync {
    /// Language served by this runner.
    fn language(&self) -> LanguageId;

    /// Prepare for runs, e.g. check that hosts can be created.
    async fn initialize(&self) -> Result<()>;

    /// Run `code`, streaming events into `sink`. Resolves exactly once.
    async fn execute(&self, code: &str, sink: OutputSink) -> ExecutionResult;

    /// Cancel the in-flight run, if any. Never blocks.
    fn cleanup(&self);

    /// Optional synchronous syntax check, run before any host is launched.
    ///
    /// `None` means the runner does not validate.
    fn validate_syntax(&self, _code: &str) -> Option<Result<()>> {
        None
    }

    /// A small program showing off the language.
    fn example_code(&self) -> &'static str {
        example_code(self.language())
    }
}
