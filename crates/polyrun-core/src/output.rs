//! Output events and the capped sink that delivers them.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default number of events delivered per run before truncation.
pub const DEFAULT_OUTPUT_CAP: usize = 1_000;

/// Console method a host used for an output line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    #[default]
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

/// One unit of streamed execution output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "level", rename_all = "lowercase")]
pub enum OutputEvent {
    /// Progress from the host, e.g. toolchain warm-up.
    Info { message: String },
    /// A console line with its arguments.
    ///
    /// `truncated` marks the synthetic warning that replaces output beyond
    /// the per-run cap.
    Output {
        console: ConsoleLevel,
        data: Vec<Value>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        truncated: bool,
    },
    /// An error reported by the host. Does not end the run by itself.
    Error { message: String },
    /// Tabular result (query language only).
    Table {
        columns: Vec<String>,
        values: Vec<Vec<Value>>,
    },
    /// Rendered markup.
    Preview { html: String },
}

impl OutputEvent {
    /// Shorthand for a `log` line with string arguments.
    pub fn log(line: impl Into<String>) -> Self {
        OutputEvent::Output {
            console: ConsoleLevel::Log,
            data: vec![Value::String(line.into())],
            truncated: false,
        }
    }

    /// The synthetic warning that replaces output beyond the cap.
    pub fn truncated(cap: usize) -> Self {
        OutputEvent::Output {
            console: ConsoleLevel::Warn,
            data: vec![Value::String(format!(
                "Output truncated: more than {cap} events, remaining output dropped"
            ))],
            truncated: true,
        }
    }

    /// Whether this is the truncation warning.
    pub fn is_truncation(&self) -> bool {
        matches!(self, OutputEvent::Output { truncated: true, .. })
    }

    /// Event level as exposed to collaborators.
    pub fn level(&self) -> &'static str {
        match self {
            OutputEvent::Info { .. } => "info",
            OutputEvent::Output { .. } => "output",
            OutputEvent::Error { .. } => "error",
            OutputEvent::Table { .. } => "table",
            OutputEvent::Preview { .. } => "preview",
        }
    }
}

/// Destination for the events of a single run.
///
/// Enforces the per-run cap and can be closed so that nothing more is
/// delivered once the run is stopped. Clones share state.
#[derive(Clone)]
pub struct OutputSink {
    inner: Arc<SinkInner>,
}

struct SinkInner {
    deliver: Box<dyn Fn(OutputEvent) + Send + Sync>,
    cap: usize,
    seen: AtomicUsize,
    closed: AtomicBool,
}

impl OutputSink {
    /// Create a sink delivering at most `cap` events to `deliver`.
    pub fn new(cap: usize, deliver: impl Fn(OutputEvent) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(SinkInner {
                deliver: Box::new(deliver),
                cap,
                seen: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self::new(0, |_| {})
    }

    /// Offer an event. Returns `true` if something was delivered.
    ///
    /// Event number `cap + 1` is replaced by a truncation warning; later
    /// events are dropped.
    pub fn emit(&self, event: OutputEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        let index = self.inner.seen.fetch_add(1, Ordering::SeqCst);
        if index < self.inner.cap {
            (self.inner.deliver)(event);
            true
        } else if index == self.inner.cap {
            tracing::debug!(cap = self.inner.cap, "output cap reached, truncating");
            (self.inner.deliver)(OutputEvent::truncated(self.inner.cap));
            true
        } else {
            false
        }
    }

    /// Stop delivering. Idempotent.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the sink has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Number of events offered so far, including dropped ones.
    pub fn offered(&self) -> usize {
        self.inner.seen.load(Ordering::SeqCst)
    }

    /// Whether output beyond the cap has been dropped.
    pub fn is_truncated(&self) -> bool {
        self.offered() > self.inner.cap
    }
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("cap", &self.inner.cap)
            .field("offered", &self.offered())
            .field("closed", &self.is_closed())
            .finish()
    }
}
