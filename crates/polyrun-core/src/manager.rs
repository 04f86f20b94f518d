//! The public entry point: single-flight runs with lifecycle callbacks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::channel::HostLauncher;
use crate::config::RunnerConfig;
use crate::error::Error;
use crate::language::LanguageId;
use crate::output::{OutputEvent, OutputSink};
use crate::registry::LanguageRegistry;
use crate::result::ExecutionResult;
use crate::runner::LanguageRunner;

/// Notifications a collaborator receives about one run.
///
/// For every call to [`RunnerManager::run`] exactly one of
/// [`on_complete`](Self::on_complete) or [`on_error`](Self::on_error) fires,
/// unless the run is stopped, in which case neither does.
pub trait RunCallbacks: Send + Sync {
    /// The request passed validation and is about to launch.
    fn on_start(&self) {}

    fn on_output(&self, event: OutputEvent);

    fn on_complete(&self, result: &ExecutionResult);

    fn on_error(&self, result: &ExecutionResult);
}

struct ActiveRun {
    id: u64,
    language: LanguageId,
    runner: Arc<dyn LanguageRunner>,
    sink: OutputSink,
    cancel: CancellationToken,
}

type Slot = Mutex<Option<ActiveRun>>;

/// Runs code, one request at a time.
pub struct RunnerManager {
    registry: LanguageRegistry,
    next_run: AtomicU64,
    active: Arc<Slot>,
}

impl RunnerManager {
    /// Manager whose hosts are `polyrun-host` processes.
    pub fn new(config: RunnerConfig) -> Self {
        Self::from_registry(LanguageRegistry::new(config))
    }

    /// Manager whose hosts come from `launcher`.
    pub fn with_launcher(config: RunnerConfig, launcher: Arc<dyn HostLauncher>) -> Self {
        Self::from_registry(LanguageRegistry::with_launcher(config, launcher))
    }

    pub fn from_registry(registry: LanguageRegistry) -> Self {
        Self {
            registry,
            next_run: AtomicU64::new(1),
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Run `code` as `language`, reporting progress through `callbacks`.
    ///
    /// The result is also returned to the caller. Requests made while
    /// another run is in flight fail with a concurrency error and launch
    /// nothing.
    pub async fn run(
        &self,
        code: &str,
        language: &str,
        callbacks: Arc<dyn RunCallbacks>,
    ) -> ExecutionResult {
        if code.trim().is_empty() {
            return reject(&*callbacks, Error::Validation("code is empty".to_string()));
        }

        let language = match language.parse::<LanguageId>() {
            Ok(language) => language,
            Err(e) => return reject(&*callbacks, e),
        };
        let Some(runner) = self.registry.get_runner(language) else {
            return reject(&*callbacks, Error::Validation(format!("{language} is disabled")));
        };

        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let sink = {
            let callbacks = Arc::clone(&callbacks);
            OutputSink::new(self.registry.config().output_cap, move |event| {
                callbacks.on_output(event)
            })
        };

        {
            let mut active = lock(&self.active);
            if active.is_some() {
                drop(active);
                tracing::debug!(%language, "rejecting run, another is in flight");
                return reject(&*callbacks, Error::Busy);
            }
            *active = Some(ActiveRun {
                id,
                language,
                runner: Arc::clone(&runner),
                sink: sink.clone(),
                cancel: cancel.clone(),
            });
        }
        let guard = RunGuard {
            active: Arc::clone(&self.active),
            id,
        };

        if let Some(Err(e)) = runner.validate_syntax(code) {
            drop(guard);
            return reject(&*callbacks, e);
        }

        tracing::info!(%language, run = id, "run started");
        callbacks.on_start();
        let started = Instant::now();

        // A stop issued from on_start, or while the runner initializes,
        // must win before any host is launched.
        let work = async {
            runner.initialize().await?;
            Ok::<_, Error>(runner.execute(code, sink).await)
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => ExecutionResult::failure(started.elapsed(), &Error::Cancelled),
            outcome = work => outcome.unwrap_or_else(|e| ExecutionResult::failure(started.elapsed(), &e)),
        };

        if !guard.is_current() {
            tracing::info!(%language, run = id, "run was stopped, dropping its result");
            return result;
        }

        tracing::info!(
            %language,
            run = id,
            success = result.success,
            duration_ms = result.duration_ms,
            "run finished"
        );
        if result.success {
            callbacks.on_complete(&result);
        } else {
            callbacks.on_error(&result);
        }
        drop(guard);
        result
    }

    /// Stop the active run. Nothing further reaches its callbacks.
    ///
    /// Returns `false` when nothing was running.
    pub fn stop(&self) -> bool {
        let Some(run) = lock(&self.active).take() else {
            return false;
        };
        run.sink.close();
        run.cancel.cancel();
        run.runner.cleanup();
        tracing::info!(language = %run.language, run = run.id, "run stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.active).is_some()
    }

    /// Enabled languages in display order.
    pub fn get_all_languages(&self) -> Vec<LanguageId> {
        self.registry.languages()
    }

    /// Example code for `language`, if it is known and enabled.
    pub fn get_example_code(&self, language: &str) -> Option<&'static str> {
        let language = language.parse::<LanguageId>().ok()?;
        self.registry
            .get_runner(language)
            .map(|runner| runner.example_code())
    }

    /// Effective timeout of `language`. Markdown has none.
    pub fn timeout_for(&self, language: LanguageId) -> Option<Duration> {
        language
            .is_isolated()
            .then(|| self.registry.config().timeout_for(language))
    }

    /// Stop any run and release every runner.
    pub fn cleanup(&self) {
        self.stop();
        self.registry.cleanup();
    }
}

impl Drop for RunnerManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Clears the active slot when the run ends, however it ends.
struct RunGuard {
    active: Arc<Slot>,
    id: u64,
}

impl RunGuard {
    fn is_current(&self) -> bool {
        matches!(lock(&self.active).as_ref(), Some(run) if run.id == self.id)
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if let Some(run) = active.take_if(|run| run.id == self.id) {
            run.sink.close();
        }
    }
}

fn reject(callbacks: &dyn RunCallbacks, error: Error) -> ExecutionResult {
    tracing::debug!(error = %error, "run rejected");
    let result = ExecutionResult::failure(Duration::ZERO, &error);
    callbacks.on_error(&result);
    result
}

fn lock(slot: &Slot) -> MutexGuard<'_, Option<ActiveRun>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
