//! Runners backed by an isolated host.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelProfile, ExecutionChannel, HostLauncher};
use crate::error::Result;
use crate::language::LanguageId;
use crate::output::OutputSink;
use crate::result::ExecutionResult;

use super::LanguageRunner;
use super::syntax::{SyntaxRules, check_syntax};

/// A language served by a fresh [`ExecutionChannel`] per run.
///
/// The languages differ only in their [`ChannelProfile`] and syntax rules;
/// the channel protocol is shared.
pub struct ChannelRunner {
    profile: ChannelProfile,
    launcher: Arc<dyn HostLauncher>,
    rules: Option<SyntaxRules>,
    next_run: AtomicU64,
    active: Arc<Mutex<Option<(u64, CancellationToken)>>>,
}

impl ChannelRunner {
    pub fn new(profile: ChannelProfile, launcher: Arc<dyn HostLauncher>) -> Self {
        let rules = SyntaxRules::for_language(profile.language);
        Self {
            profile,
            launcher,
            rules,
            next_run: AtomicU64::new(0),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn profile(&self) -> &ChannelProfile {
        &self.profile
    }

    /// Whether a run is in flight.
    pub fn is_active(&self) -> bool {
        lock(&self.active).is_some()
    }
}

#[async_trait]
impl LanguageRunner for ChannelRunner {
    fn language(&self) -> LanguageId {
        self.profile.language
    }

    async fn initialize(&self) -> Result<()> {
        self.launcher.check_available(self.profile.language).await
    }

    async fn execute(&self, code: &str, sink: OutputSink) -> ExecutionResult {
        let run_id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        if let Some((_, previous)) = lock(&self.active).replace((run_id, cancel.clone())) {
            previous.cancel();
        }
        // Clears the slot even if this future is dropped mid-run.
        let _slot = ActiveSlot {
            active: Arc::clone(&self.active),
            run_id,
        };

        tracing::debug!(language = %self.profile.language, run_id, "starting channel run");
        let mut channel = ExecutionChannel::new(self.profile.clone(), Arc::clone(&self.launcher));
        channel.run(code, &sink, &cancel).await
    }

    fn cleanup(&self) {
        if let Some((run_id, cancel)) = lock(&self.active).as_ref() {
            tracing::debug!(language = %self.profile.language, run_id, "cancelling run");
            cancel.cancel();
        }
    }

    fn validate_syntax(&self, code: &str) -> Option<Result<()>> {
        self.rules.as_ref().map(|rules| check_syntax(code, rules))
    }
}

struct ActiveSlot {
    active: Arc<Mutex<Option<(u64, CancellationToken)>>>,
    run_id: u64,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if matches!(active.as_ref(), Some((id, _)) if *id == self.run_id) {
            *active = None;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{HostScript, ScriptedLauncher};
    use std::time::Duration;

    fn runner(language: LanguageId, launcher: Arc<ScriptedLauncher>) -> Arc<ChannelRunner> {
        let profile = ChannelProfile::for_language(language, Duration::from_secs(30)).unwrap();
        Arc::new(ChannelRunner::new(profile, launcher))
    }

    #[tokio::test]
    async fn test_each_run_gets_a_fresh_host() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().complete(true));
        let runner = runner(LanguageId::Lua, launcher.clone());

        assert!(runner.execute("print(1)", OutputSink::discard()).await.success);
        assert!(runner.execute("print(2)", OutputSink::discard()).await.success);

        assert_eq!(launcher.launches(), 2);
        assert_eq!(launcher.terminations(), 2);
        let tokens = launcher.tokens();
        assert_ne!(tokens[0], tokens[1]);
        assert!(!runner.is_active());
    }

    #[tokio::test]
    async fn test_cleanup_cancels_in_flight_run() {
        let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().hang());
        let runner = runner(LanguageId::JavaScript, launcher.clone());

        let task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.execute("for(;;){}", OutputSink::discard()).await })
        };
        while launcher.received_code().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(runner.is_active());

        runner.cleanup();
        let result = task.await.unwrap();

        assert_eq!(result.kind, Some(ErrorKind::Cancelled));
        assert_eq!(launcher.terminations(), 1);
        assert!(!runner.is_active());
    }

    #[test]
    fn test_cleanup_without_run_is_a_no_op() {
        let launcher = ScriptedLauncher::new(HostScript::new());
        let runner = runner(LanguageId::Python, launcher.clone());
        runner.cleanup();
        runner.cleanup();
        assert_eq!(launcher.launches(), 0);
    }

    #[tokio::test]
    async fn test_initialize_reports_missing_host() {
        let launcher = ScriptedLauncher::new(HostScript::new());
        assert!(runner(LanguageId::Sql, launcher).initialize().await.is_ok());
    }

    #[test]
    fn test_validate_syntax_uses_language_rules() {
        let launcher = ScriptedLauncher::new(HostScript::new());
        let runner = runner(LanguageId::Python, launcher);

        assert!(matches!(runner.validate_syntax("print('ok')"), Some(Ok(()))));
        assert!(matches!(runner.validate_syntax("print('ok'"), Some(Err(_))));
    }
}
