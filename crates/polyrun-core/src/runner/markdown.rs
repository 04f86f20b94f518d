//! Markdown preview. Rendered in-process, no host.

use std::time::Instant;

use async_trait::async_trait;
use comrak::{Options, markdown_to_html};

use crate::error::Result;
use crate::language::LanguageId;
use crate::output::{OutputEvent, OutputSink};
use crate::result::ExecutionResult;

use super::LanguageRunner;

/// Renders markdown to HTML and emits it as a single preview event.
///
/// Raw HTML in the source is omitted, not passed through.
#[derive(Debug, Default)]
pub struct MarkdownRunner;

impl MarkdownRunner {
    pub fn new() -> Self {
        Self
    }

    pub fn render(code: &str) -> String {
        let mut options = Options::default();
        options.extension.table = true;
        options.extension.strikethrough = true;
        options.extension.tasklist = true;
        options.extension.autolink = true;
        markdown_to_html(code, &options)
    }
}

#[async_trait]
impl LanguageRunner for MarkdownRunner {
    fn language(&self) -> LanguageId {
        LanguageId::Markdown
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, code: &str, sink: OutputSink) -> ExecutionResult {
        let started = Instant::now();
        let html = Self::render(code);
        sink.emit(OutputEvent::Preview { html });
        ExecutionResult::success(started.elapsed())
    }

    fn cleanup(&self) {}
}
