//! Execution channels.
//!
//! A channel is one run's session with an isolated host: it owns the host
//! handle, the message link and the timeout, and resolves exactly one
//! [`ExecutionResult`].
//!
//! # State machine
//!
//! ```text
//! Idle ──run()──► Launching ──host up──► AwaitingReady ──READY──► Running
//!                    │                                               │
//!                    └─ launch fails ─► Failed          COMPLETE ─► Completed
//!                                                        timer ───► TimedOut
//!                                                        host gone ► Failed
//!
//! any state ──destroy()──► Destroyed   (idempotent)
//! ```
//!
//! Frames carrying another run's correlation token, or arriving before READY,
//! are discarded. Completion and timeout race inside a single `select!`;
//! whichever wins tears the host down and the other is never observed.
//!
//! # Module Structure
//!
//! - `host` - launcher/handle traits at the isolation boundary
//! - `process` - `polyrun-host` child processes

mod host;
mod process;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::language::LanguageId;
use crate::output::OutputSink;
use crate::protocol::{CorrelationToken, ExecuteRequest, HostMessage};
use crate::result::ExecutionResult;

pub use host::{HostHandle, HostLauncher, HostLink, HostSession, HostSpec};
pub use process::ProcessLauncher;

/// Per-language parameters of a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProfile {
    pub language: LanguageId,
    pub prefix: &'static str,
    pub timeout: Duration,
}

impl ChannelProfile {
    /// Profile for an isolated language, `None` for hostless ones.
    pub fn for_language(language: LanguageId, timeout: Duration) -> Option<Self> {
        language.protocol_prefix().map(|prefix| Self {
            language,
            prefix,
            timeout,
        })
    }
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Launching,
    AwaitingReady,
    Running,
    Completed,
    Failed,
    TimedOut,
    Destroyed,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChannelState::Completed
                | ChannelState::Failed
                | ChannelState::TimedOut
                | ChannelState::Destroyed
        )
    }
}

/// One run's session with one isolated host. Single use.
pub struct ExecutionChannel {
    profile: ChannelProfile,
    launcher: Arc<dyn HostLauncher>,
    state: ChannelState,
    /// Terminal state reached before destruction.
    outcome: Option<ChannelState>,
    token: Option<CorrelationToken>,
    host: Option<Box<dyn HostHandle>>,
    link: Option<HostLink>,
    last_error: Option<String>,
}

enum Wake {
    Line(Option<String>),
    TimedOut,
    Cancelled,
}

impl ExecutionChannel {
    pub fn new(profile: ChannelProfile, launcher: Arc<dyn HostLauncher>) -> Self {
        Self {
            profile,
            launcher,
            state: ChannelState::Idle,
            outcome: None,
            token: None,
            host: None,
            link: None,
            last_error: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// The terminal state the run ended in, once it has ended.
    pub fn outcome(&self) -> Option<ChannelState> {
        self.outcome
    }

    /// Correlation token of this run, once launched.
    pub fn token(&self) -> Option<&CorrelationToken> {
        self.token.as_ref()
    }

    pub fn profile(&self) -> &ChannelProfile {
        &self.profile
    }

    /// Whether the channel still owns a host.
    pub fn has_host(&self) -> bool {
        self.host.is_some()
    }

    /// Launch a host, run `code`, and stream events into `sink`.
    ///
    /// Resolves once: on COMPLETE, on failure, on timeout, or when `cancel`
    /// fires. The host is torn down before this returns.
    pub async fn run(
        &mut self,
        code: &str,
        sink: &OutputSink,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        if self.state != ChannelState::Idle {
            return ExecutionResult::failure(
                Duration::ZERO,
                &Error::Protocol("channel has already been used".to_string()),
            );
        }

        let started = Instant::now();
        let token = CorrelationToken::generate();
        let deadline = tokio::time::Instant::now() + self.profile.timeout;
        self.token = Some(token.clone());
        self.transition(ChannelState::Launching);

        let timer = tokio::time::sleep_until(deadline);
        tokio::pin!(timer);

        let spec = HostSpec {
            language: self.profile.language,
            prefix: self.profile.prefix,
            token,
        };
        let launcher = Arc::clone(&self.launcher);
        let launched = tokio::select! {
            result = launcher.launch(&spec) => Some(result),
            _ = &mut timer => None,
            _ = cancel.cancelled() => return self.cancelled(started),
        };

        match launched {
            Some(Ok(session)) => {
                self.host = Some(session.handle);
                self.link = Some(session.link);
                self.transition(ChannelState::AwaitingReady);
            }
            Some(Err(e)) => {
                let error = match e {
                    Error::Initialization { .. } => e,
                    other => Error::Initialization {
                        language: self.profile.language,
                        message: other.to_string(),
                    },
                };
                tracing::warn!(language = %self.profile.language, error = %error, "host launch failed");
                return self.finish(
                    ChannelState::Failed,
                    ExecutionResult::failure(started.elapsed(), &error),
                );
            }
            None => return self.timed_out(started),
        }

        loop {
            let wake = tokio::select! {
                line = next_line(&mut self.link) => Wake::Line(line),
                _ = &mut timer => Wake::TimedOut,
                _ = cancel.cancelled() => Wake::Cancelled,
            };

            match wake {
                Wake::Line(Some(line)) => {
                    if let Some((state, result)) = self.handle_line(&line, code, sink, started) {
                        return self.finish(state, result);
                    }
                }
                Wake::Line(None) => {
                    let message = match self.last_error.take() {
                        Some(last) => format!("host exited before completing: {last}"),
                        None => "host exited before completing".to_string(),
                    };
                    return self.finish(
                        ChannelState::Failed,
                        ExecutionResult::failure(started.elapsed(), &Error::Runtime(message)),
                    );
                }
                Wake::TimedOut => return self.timed_out(started),
                Wake::Cancelled => return self.cancelled(started),
            }
        }
    }

    /// Tear everything down. Returns `false` if already destroyed.
    ///
    /// Detaches the listener and releases the host. The timer lives in
    /// [`run`](Self::run) and goes away with it.
    pub fn destroy(&mut self) -> bool {
        if self.state == ChannelState::Destroyed {
            return false;
        }

        self.link = None;
        if let Some(mut host) = self.host.take() {
            tracing::debug!(language = %self.profile.language, pid = ?host.id(), "releasing host");
            host.terminate();
        }
        self.transition(ChannelState::Destroyed);
        true
    }

    /// Handle one inbound line. Returns the terminal state and result once
    /// the run is over.
    fn handle_line(
        &mut self,
        line: &str,
        code: &str,
        sink: &OutputSink,
        started: Instant,
    ) -> Option<(ChannelState, ExecutionResult)> {
        let (token, message) = match HostMessage::decode(line, self.profile.prefix) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::debug!(language = %self.profile.language, error = %e, "discarding frame");
                return None;
            }
        };

        if self.token.as_ref() != Some(&token) {
            tracing::debug!(
                language = %self.profile.language,
                stale = %token,
                kind = message.kind(),
                "discarding frame from another run"
            );
            return None;
        }

        match (self.state, message) {
            (ChannelState::AwaitingReady, HostMessage::Ready) => {
                self.transition(ChannelState::Running);
                if let Err(e) = self.send_code(code) {
                    return Some((
                        ChannelState::Failed,
                        ExecutionResult::failure(started.elapsed(), &e),
                    ));
                }
                None
            }
            (ChannelState::AwaitingReady, other) => {
                tracing::debug!(kind = other.kind(), "discarding frame before READY");
                None
            }
            (ChannelState::Running, HostMessage::Ready) => {
                tracing::debug!("ignoring repeated READY");
                None
            }
            (
                ChannelState::Running,
                HostMessage::Complete {
                    success,
                    duration_ms,
                    error,
                },
            ) => {
                let duration_ms = duration_ms.unwrap_or_else(|| {
                    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
                });
                let result = if success {
                    ExecutionResult {
                        success: true,
                        duration_ms,
                        error: None,
                        kind: None,
                    }
                } else {
                    let message = error
                        .or_else(|| self.last_error.take())
                        .unwrap_or_else(|| "execution failed".to_string());
                    ExecutionResult::runtime_failure(duration_ms, message)
                };
                Some((ChannelState::Completed, result))
            }
            (ChannelState::Running, message) => {
                if let HostMessage::Error { message: text } = &message {
                    self.last_error = Some(text.clone());
                }
                if let Some(event) = message.to_event() {
                    sink.emit(event);
                }
                None
            }
            (state, message) => {
                tracing::debug!(?state, kind = message.kind(), "discarding frame in state");
                None
            }
        }
    }

    fn send_code(&mut self, code: &str) -> Result<(), Error> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::Protocol("channel has no token".to_string()))?;
        let line = ExecuteRequest::new(code).encode(self.profile.prefix, token)?;
        let link = self
            .link
            .as_ref()
            .ok_or_else(|| Error::Ipc("host link is detached".to_string()))?;
        link.outbound
            .send(line)
            .map_err(|_| Error::Ipc("host stopped accepting input".to_string()))
    }

    fn timed_out(&mut self, started: Instant) -> ExecutionResult {
        tracing::warn!(
            language = %self.profile.language,
            timeout = ?self.profile.timeout,
            "run timed out, tearing host down"
        );
        self.finish(
            ChannelState::TimedOut,
            ExecutionResult::failure(started.elapsed(), &Error::Timeout(self.profile.timeout)),
        )
    }

    fn cancelled(&mut self, started: Instant) -> ExecutionResult {
        self.finish(
            ChannelState::Failed,
            ExecutionResult::failure(started.elapsed(), &Error::Cancelled),
        )
    }

    fn finish(&mut self, state: ChannelState, result: ExecutionResult) -> ExecutionResult {
        self.outcome = Some(state);
        self.transition(state);
        self.destroy();
        result
    }

    fn transition(&mut self, next: ChannelState) {
        tracing::debug!(
            language = %self.profile.language,
            token = ?self.token.as_ref().map(CorrelationToken::as_str),
            from = ?self.state,
            to = ?next,
            "channel state"
        );
        self.state = next;
    }
}

impl Drop for ExecutionChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn next_line(link: &mut Option<HostLink>) -> Option<String> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputEvent;
    use crate::testing::{HostScript, ScriptedLauncher};
    use std::sync::Mutex;

    fn profile(timeout: Duration) -> ChannelProfile {
        ChannelProfile::for_language(LanguageId::Python, timeout).unwrap()
    }

    fn collecting() -> (OutputSink, Arc<Mutex<Vec<OutputEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = events.clone();
        let sink = OutputSink::new(1_000, move |e| sink_events.lock().unwrap().push(e));
        (sink, events)
    }

    #[test]
    fn test_profile_only_for_isolated_languages() {
        assert!(ChannelProfile::for_language(LanguageId::Markdown, Duration::from_secs(1)).is_none());
        let profile = ChannelProfile::for_language(LanguageId::Sql, Duration::from_secs(1)).unwrap();
        assert_eq!(profile.prefix, "SQL");
    }

    #[tokio::test]
    async fn test_happy_path_reaches_destroyed() {
        let launcher = ScriptedLauncher::new(
            HostScript::new()
                .ready()
                .expect_execute()
                .output("1")
                .complete(true),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher.clone());
        let (sink, events) = collecting();

        let result = channel.run("print(1)", &sink, &CancellationToken::new()).await;

        assert!(result.success, "{result:?}");
        assert_eq!(channel.state(), ChannelState::Destroyed);
        assert_eq!(channel.outcome(), Some(ChannelState::Completed));
        assert!(!channel.has_host());
        assert_eq!(*events.lock().unwrap(), vec![OutputEvent::log("1")]);
        assert_eq!(launcher.received_code(), vec!["print(1)".to_string()]);
        assert_eq!(launcher.terminations(), 1);
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().complete(true));
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher.clone());

        channel.run("x", &OutputSink::discard(), &CancellationToken::new()).await;
        assert!(!channel.destroy());
        assert!(!channel.destroy());
        drop(channel);

        assert_eq!(launcher.terminations(), 1);
    }

    #[tokio::test]
    async fn test_channel_is_single_use() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().complete(true));
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher.clone());

        assert!(channel.run("x", &OutputSink::discard(), &CancellationToken::new()).await.success);
        let second = channel.run("x", &OutputSink::discard(), &CancellationToken::new()).await;

        assert!(!second.success);
        assert_eq!(launcher.launches(), 1);
    }

    #[tokio::test]
    async fn test_frames_before_ready_are_discarded() {
        let launcher = ScriptedLauncher::new(
            HostScript::new()
                .output("too early")
                .ready()
                .expect_execute()
                .output("on time")
                .complete(true),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher);
        let (sink, events) = collecting();

        channel.run("x", &sink, &CancellationToken::new()).await;

        assert_eq!(*events.lock().unwrap(), vec![OutputEvent::log("on time")]);
    }

    #[tokio::test]
    async fn test_repeated_ready_does_not_resend_code() {
        let launcher = ScriptedLauncher::new(
            HostScript::new()
                .ready()
                .expect_execute()
                .ready()
                .complete(true),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher.clone());

        channel.run("once", &OutputSink::discard(), &CancellationToken::new()).await;

        assert_eq!(launcher.received_code().len(), 1);
    }

    #[tokio::test]
    async fn test_error_frames_do_not_end_the_run() {
        let launcher = ScriptedLauncher::new(
            HostScript::new()
                .ready()
                .expect_execute()
                .error("warning: deprecated")
                .output("still going")
                .complete(true),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher);
        let (sink, events) = collecting();

        let result = channel.run("x", &sink, &CancellationToken::new()).await;

        assert!(result.success);
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].level(), "error");
    }

    #[tokio::test]
    async fn test_partial_failure_uses_last_error() {
        let launcher = ScriptedLauncher::new(
            HostScript::new()
                .ready()
                .expect_execute()
                .error("NameError: name 'x' is not defined")
                .complete(false),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher);

        let result = channel.run("x", &OutputSink::discard(), &CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(result.kind, Some(crate::ErrorKind::Runtime));
        assert_eq!(result.error.as_deref(), Some("NameError: name 'x' is not defined"));
    }

    #[tokio::test]
    async fn test_host_exit_before_complete_fails() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().exit());
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher);

        let result = channel.run("x", &OutputSink::discard(), &CancellationToken::new()).await;

        assert!(!result.success);
        assert_eq!(channel.outcome(), Some(ChannelState::Failed));
        assert!(result.error.unwrap().contains("host exited"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_initialization_error() {
        let launcher = ScriptedLauncher::failing("interpreter bundle missing");
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(5)), launcher);
        let (sink, events) = collecting();

        let result = channel.run("x", &sink, &CancellationToken::new()).await;

        assert_eq!(result.kind, Some(crate::ErrorKind::Initialization));
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(channel.state(), ChannelState::Destroyed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_tears_host_down() {
        let launcher = ScriptedLauncher::new(
            HostScript::new().ready().expect_execute().output("working").hang(),
        );
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(15)), launcher.clone());
        let (sink, events) = collecting();

        let started = tokio::time::Instant::now();
        let result = channel.run("while True: pass", &sink, &CancellationToken::new()).await;

        assert!(result.is_timeout());
        assert_eq!(result.error.as_deref(), Some("execution timed out after 15s"));
        assert!(started.elapsed() >= Duration::from_secs(15));
        assert!(started.elapsed() < Duration::from_secs(16));
        assert_eq!(channel.outcome(), Some(ChannelState::TimedOut));
        assert_eq!(launcher.terminations(), 1);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_releases_host() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().hang());
        let mut channel = ExecutionChannel::new(profile(Duration::from_secs(60)), launcher.clone());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = channel.run("x", &OutputSink::discard(), &cancel).await;

        assert_eq!(result.kind, Some(crate::ErrorKind::Cancelled));
        assert_eq!(launcher.terminations(), 1);
    }
}
