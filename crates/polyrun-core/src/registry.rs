//! Lazily built, memoized runners.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::channel::{ChannelProfile, HostLauncher, ProcessLauncher};
use crate::config::RunnerConfig;
use crate::language::LanguageId;
use crate::runner::{ChannelRunner, LanguageRunner, MarkdownRunner};

/// Maps language ids to runners, building each one on first lookup.
pub struct LanguageRegistry {
    config: Arc<RunnerConfig>,
    launcher: Arc<dyn HostLauncher>,
    runners: Mutex<FxHashMap<LanguageId, Arc<dyn LanguageRunner>>>,
}

impl LanguageRegistry {
    /// Registry whose runners spawn `polyrun-host` processes.
    pub fn new(config: RunnerConfig) -> Self {
        let launcher = Arc::new(ProcessLauncher::new(&config));
        Self::with_launcher(config, launcher)
    }

    /// Registry whose runners launch hosts through `launcher`.
    pub fn with_launcher(config: RunnerConfig, launcher: Arc<dyn HostLauncher>) -> Self {
        Self {
            config: Arc::new(config),
            launcher,
            runners: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Enabled languages in display order.
    pub fn languages(&self) -> Vec<LanguageId> {
        self.config.enabled_languages()
    }

    /// The runner for `language`, or `None` if the language is disabled.
    ///
    /// Later lookups return the same instance until [`cleanup`](Self::cleanup).
    pub fn get_runner(&self, language: LanguageId) -> Option<Arc<dyn LanguageRunner>> {
        if !self.config.is_enabled(language) {
            return None;
        }

        let mut runners = self.lock();
        let runner = runners
            .entry(language)
            .or_insert_with(|| self.build(language));
        Some(Arc::clone(runner))
    }

    /// Number of runners built so far.
    pub fn instantiated(&self) -> usize {
        self.lock().len()
    }

    /// Cancel every instantiated runner and forget them.
    pub fn cleanup(&self) {
        let runners: Vec<_> = self.lock().drain().collect();
        for (language, runner) in runners {
            tracing::debug!(%language, "cleaning up runner");
            runner.cleanup();
        }
    }

    fn build(&self, language: LanguageId) -> Arc<dyn LanguageRunner> {
        let timeout = self.config.timeout_for(language);
        match ChannelProfile::for_language(language, timeout) {
            Some(profile) => {
                tracing::debug!(%language, ?timeout, prefix = profile.prefix, "building channel runner");
                Arc::new(ChannelRunner::new(profile, Arc::clone(&self.launcher)))
            }
            None => Arc::new(MarkdownRunner::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FxHashMap<LanguageId, Arc<dyn LanguageRunner>>> {
        self.runners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
