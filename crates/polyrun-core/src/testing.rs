//! In-memory hosts for exercising channels, runners and the manager.
//!
//! A [`ScriptedLauncher`] creates hosts that follow a [`HostScript`] instead of
//! running code. It records every launch, every EXECUTE payload and every
//! teardown so tests can assert on the host lifecycle.
//!
//! ```
//! use polyrun_core::testing::{HostScript, ScriptedLauncher};
//!
//! let launcher = ScriptedLauncher::new(
//!     HostScript::new().ready().expect_execute().output("1").complete(true),
//! );
//! assert_eq!(launcher.launches(), 0);
//! ```
//!
//! [`RecordingCallbacks`] captures what a collaborator of
//! [`RunnerManager`](crate::RunnerManager) would see.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::channel::{HostHandle, HostLauncher, HostLink, HostSession, HostSpec};
use crate::error::{Error, Result};
use crate::manager::RunCallbacks;
use crate::output::{ConsoleLevel, OutputEvent};
use crate::protocol::{CorrelationToken, ExecuteRequest, HostMessage};
use crate::result::ExecutionResult;

#[derive(Clone)]
enum Step {
    Send(HostMessage),
    SendStale(HostMessage),
    Raw(String),
    ExpectExecute,
    Burst(usize),
    Delay(Duration),
    WaitFor(Arc<Notify>),
    Hang,
    Exit,
}

/// What a scripted host does, in order. Reaching the end closes the link.
#[derive(Clone, Default)]
pub struct HostScript {
    steps: Vec<Step>,
}

impl HostScript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ready(self) -> Self {
        self.send(HostMessage::Ready)
    }

    /// Block until the EXECUTE request for this run arrives.
    pub fn expect_execute(mut self) -> Self {
        self.steps.push(Step::ExpectExecute);
        self
    }

    pub fn loading(self, message: &str) -> Self {
        self.send(HostMessage::Loading {
            message: message.to_string(),
        })
    }

    pub fn output(self, line: &str) -> Self {
        self.send(HostMessage::Output {
            level: ConsoleLevel::Log,
            data: vec![Value::String(line.to_string())],
        })
    }

    pub fn error(self, message: &str) -> Self {
        self.send(HostMessage::Error {
            message: message.to_string(),
        })
    }

    pub fn table(self, columns: &[&str], values: Vec<Vec<Value>>) -> Self {
        self.send(HostMessage::Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            values,
        })
    }

    pub fn complete(self, success: bool) -> Self {
        self.send(HostMessage::Complete {
            success,
            duration_ms: Some(1),
            error: None,
        })
    }

    /// Send an arbitrary message with this run's token.
    pub fn send(mut self, message: HostMessage) -> Self {
        self.steps.push(Step::Send(message));
        self
    }

    /// Send a message carrying the previous launch's token.
    pub fn stale(mut self, message: HostMessage) -> Self {
        self.steps.push(Step::SendStale(message));
        self
    }

    /// Send a raw protocol line.
    pub fn raw(mut self, line: &str) -> Self {
        self.steps.push(Step::Raw(line.to_string()));
        self
    }

    /// Send `count` numbered output lines.
    pub fn burst(mut self, count: usize) -> Self {
        self.steps.push(Step::Burst(count));
        self
    }

    pub fn delay(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Delay(duration));
        self
    }

    /// Pause until `gate` is notified.
    pub fn wait_for(mut self, gate: Arc<Notify>) -> Self {
        self.steps.push(Step::WaitFor(gate));
        self
    }

    /// Stay silent until torn down.
    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    /// Exit without completing.
    pub fn exit(mut self) -> Self {
        self.steps.push(Step::Exit);
        self
    }
}

#[derive(Default)]
struct Record {
    tokens: Vec<CorrelationToken>,
    received_code: Vec<String>,
}

/// Launcher whose hosts follow a script.
pub struct ScriptedLauncher {
    scripts: Vec<HostScript>,
    failure: Option<String>,
    launches: AtomicUsize,
    terminations: Arc<AtomicUsize>,
    record: Arc<Mutex<Record>>,
}

impl ScriptedLauncher {
    /// Every launch follows `script`.
    pub fn new(script: HostScript) -> Arc<Self> {
        Self::with_scripts(vec![script])
    }

    /// Launch `n` follows `scripts[n]`; the last script repeats.
    pub fn with_scripts(scripts: Vec<HostScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts,
            failure: None,
            launches: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
            record: Arc::new(Mutex::new(Record::default())),
        })
    }

    /// Every launch fails with `message`.
    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            scripts: Vec::new(),
            failure: Some(message.to_string()),
            launches: AtomicUsize::new(0),
            terminations: Arc::new(AtomicUsize::new(0)),
            record: Arc::new(Mutex::new(Record::default())),
        })
    }

    /// Number of launch attempts.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Number of hosts torn down.
    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Code received by hosts, in order.
    pub fn received_code(&self) -> Vec<String> {
        self.lock().received_code.clone()
    }

    /// Tokens handed to hosts, in launch order.
    pub fn tokens(&self) -> Vec<CorrelationToken> {
        self.lock().tokens.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Record> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl HostLauncher for ScriptedLauncher {
    async fn launch(&self, spec: &HostSpec) -> Result<HostSession> {
        let index = self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(Error::Initialization {
                language: spec.language,
                message: message.clone(),
            });
        }

        let script = self
            .scripts
            .get(index)
            .or_else(|| self.scripts.last())
            .cloned()
            .unwrap_or_default();

        let previous = {
            let mut record = self.lock();
            let previous = record.tokens.last().cloned();
            record.tokens.push(spec.token.clone());
            previous
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let killed = CancellationToken::new();

        tokio::spawn(play(
            script.steps,
            spec.clone(),
            previous,
            outbound_rx,
            inbound_tx,
            killed.clone(),
            Arc::clone(&self.record),
        ));

        Ok(HostSession {
            link: HostLink {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            handle: Box::new(ScriptedHost {
                killed,
                terminations: Arc::clone(&self.terminations),
            }),
        })
    }
}

struct ScriptedHost {
    killed: CancellationToken,
    terminations: Arc<AtomicUsize>,
}

impl HostHandle for ScriptedHost {
    fn terminate(&mut self) {
        if !self.killed.is_cancelled() {
            self.killed.cancel();
            self.terminations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

async fn play(
    steps: Vec<Step>,
    spec: HostSpec,
    previous: Option<CorrelationToken>,
    mut from_channel: mpsc::UnboundedReceiver<String>,
    to_channel: mpsc::UnboundedSender<String>,
    killed: CancellationToken,
    record: Arc<Mutex<Record>>,
) {
    let send = |message: &HostMessage, token: &CorrelationToken| -> bool {
        match message.encode(spec.prefix, token) {
            Ok(line) => to_channel.send(line).is_ok(),
            Err(_) => false,
        }
    };

    for step in steps {
        if killed.is_cancelled() {
            return;
        }
        match step {
            Step::Send(message) => {
                if !send(&message, &spec.token) {
                    return;
                }
            }
            Step::SendStale(message) => {
                let token = previous.clone().unwrap_or_else(CorrelationToken::generate);
                if !send(&message, &token) {
                    return;
                }
            }
            Step::Raw(line) => {
                if to_channel.send(line).is_err() {
                    return;
                }
            }
            Step::Burst(count) => {
                for i in 1..=count {
                    let message = HostMessage::Output {
                        level: ConsoleLevel::Log,
                        data: vec![Value::String(i.to_string())],
                    };
                    if !send(&message, &spec.token) {
                        return;
                    }
                }
            }
            Step::ExpectExecute => loop {
                let line = tokio::select! {
                    line = from_channel.recv() => line,
                    _ = killed.cancelled() => return,
                };
                let Some(line) = line else { return };
                if let Ok((token, request)) = ExecuteRequest::decode(&line, spec.prefix)
                    && token == spec.token
                {
                    record
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .received_code
                        .push(request.code);
                    break;
                }
            },
            Step::Delay(duration) => {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = killed.cancelled() => return,
                }
            }
            Step::WaitFor(gate) => {
                tokio::select! {
                    _ = gate.notified() => {}
                    _ = killed.cancelled() => return,
                }
            }
            Step::Hang => {
                killed.cancelled().await;
                return;
            }
            Step::Exit => return,
        }
    }
}

/// One callback invocation, in the order received.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Start,
    Output(OutputEvent),
    Complete(ExecutionResult),
    Error(ExecutionResult),
}

/// [`RunCallbacks`] that records every notification.
#[derive(Default)]
pub struct RecordingCallbacks {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingCallbacks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().clone()
    }

    pub fn starts(&self) -> usize {
        self.lock()
            .iter()
            .filter(|n| matches!(n, Notification::Start))
            .count()
    }

    pub fn events(&self) -> Vec<OutputEvent> {
        self.lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Output(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<ExecutionResult> {
        self.lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Complete(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ExecutionResult> {
        self.lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Error(result) => Some(result.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of terminal callbacks received.
    pub fn results(&self) -> usize {
        self.completions().len() + self.errors().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notification>> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunCallbacks for RecordingCallbacks {
    fn on_start(&self) {
        self.lock().push(Notification::Start);
    }

    fn on_output(&self, event: OutputEvent) {
        self.lock().push(Notification::Output(event));
    }

    fn on_complete(&self, result: &ExecutionResult) {
        self.lock().push(Notification::Complete(result.clone()));
    }

    fn on_error(&self, result: &ExecutionResult) {
        self.lock().push(Notification::Error(result.clone()));
    }
}
