//! Runner configuration.
//!
//! Defaults come from [`LanguageId`]; a JSON file and `POLYRUN_*` environment
//! variables can override them:
//!
//! ```json
//! {
//!   "timeouts_ms": { "python": 45000 },
//!   "output_cap": 500,
//!   "host_path": "/opt/polyrun/bin/polyrun-host",
//!   "interpreters": { "lua": "/usr/bin/lua5.4" },
//!   "disabled": ["typescript"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::language::LanguageId;
use crate::output::DEFAULT_OUTPUT_CAP;

/// Environment variable naming the host binary.
pub const HOST_PATH_ENV: &str = "POLYRUN_HOST_PATH";
/// Environment variable overriding the output cap.
pub const OUTPUT_CAP_ENV: &str = "POLYRUN_OUTPUT_CAP";
/// Prefix of per-language timeout variables, in seconds (`POLYRUN_TIMEOUT_PYTHON=45`).
pub const TIMEOUT_ENV_PREFIX: &str = "POLYRUN_TIMEOUT_";

/// Tuning knobs for the runner engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Per-language wall-clock limits in milliseconds.
    pub timeouts_ms: BTreeMap<LanguageId, u64>,
    /// Events delivered per run before truncation.
    pub output_cap: usize,
    /// Explicit path to the `polyrun-host` binary.
    pub host_path: Option<PathBuf>,
    /// Interpreter overrides handed to the host.
    pub interpreters: BTreeMap<LanguageId, PathBuf>,
    /// Languages the registry refuses to serve.
    pub disabled: Vec<LanguageId>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeouts_ms: BTreeMap::new(),
            output_cap: DEFAULT_OUTPUT_CAP,
            host_path: None,
            interpreters: BTreeMap::new(),
            disabled: Vec::new(),
        }
    }
}

impl RunnerConfig {
    /// Load a JSON config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `POLYRUN_*` overrides from the process environment.
    pub fn with_env(self) -> Result<Self> {
        self.with_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(path) = lookup(HOST_PATH_ENV).filter(|p| !p.is_empty()) {
            self.host_path = Some(PathBuf::from(path));
        }

        if let Some(cap) = lookup(OUTPUT_CAP_ENV) {
            self.output_cap = cap.trim().parse().map_err(|_| {
                Error::Config(format!("{OUTPUT_CAP_ENV} must be a positive integer, got '{cap}'"))
            })?;
        }

        for lang in LanguageId::ALL {
            let key = format!("{TIMEOUT_ENV_PREFIX}{}", lang.as_str().to_ascii_uppercase());
            if let Some(secs) = lookup(&key) {
                let secs: f64 = secs.trim().parse().map_err(|_| {
                    Error::Config(format!("{key} must be a number of seconds, got '{secs}'"))
                })?;
                let timeout = timeout_from_secs(secs)
                    .map_err(|reason| Error::Config(format!("{key} {reason}")))?;
                self.set_timeout(lang, timeout);
            }
        }

        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.output_cap == 0 {
            return Err(Error::Config("output_cap must be at least 1".to_string()));
        }
        if let Some((lang, _)) = self.timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(Error::Config(format!("timeout for {lang} must be positive")));
        }
        Ok(())
    }

    /// Effective timeout for a language.
    pub fn timeout_for(&self, language: LanguageId) -> Duration {
        self.timeouts_ms
            .get(&language)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or_else(|| language.default_timeout())
    }

    pub fn set_timeout(&mut self, language: LanguageId, timeout: Duration) {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self.timeouts_ms.insert(language, ms);
    }

    pub fn is_enabled(&self, language: LanguageId) -> bool {
        !self.disabled.contains(&language)
    }

    /// Enabled languages in display order.
    pub fn enabled_languages(&self) -> Vec<LanguageId> {
        LanguageId::ALL
            .into_iter()
            .filter(|l| self.is_enabled(*l))
            .collect()
    }

    pub fn interpreter_for(&self, language: LanguageId) -> Option<&Path> {
        self.interpreters.get(&language).map(PathBuf::as_path)
    }
}

/// Convert user-supplied seconds into a timeout.
///
/// Rejects zero, negative, NaN and values too large for a [`Duration`].
pub fn timeout_from_secs(secs: f64) -> std::result::Result<Duration, String> {
    if secs.is_nan() || secs <= 0.0 {
        return Err(format!("must be a positive number of seconds, got {secs}"));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| format!("is out of range: {secs}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_follow_language() {
        let config = RunnerConfig::default();
        assert_eq!(config.output_cap, 1_000);
        assert_eq!(config.timeout_for(LanguageId::Python), Duration::from_secs(30));
        assert_eq!(config.timeout_for(LanguageId::JavaScript), Duration::from_secs(15));
        assert_eq!(config.enabled_languages().len(), LanguageId::ALL.len());
    }

    #[test]
    fn test_load_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("polyrun.json");
        std::fs::write(
            &path,
            r#"{"timeouts_ms": {"python": 45000}, "output_cap": 50, "disabled": ["lua"]}"#,
        )
        .unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.timeout_for(LanguageId::Python), Duration::from_secs(45));
        assert_eq!(config.output_cap, 50);
        assert!(!config.is_enabled(LanguageId::Lua));
        assert!(!config.enabled_languages().contains(&LanguageId::Lua));
    }

    #[test]
    fn test_load_rejects_zero_cap() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"output_cap": 0}"#).unwrap();
        assert!(matches!(RunnerConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("POLYRUN_HOST_PATH", "/opt/polyrun-host"),
            ("POLYRUN_OUTPUT_CAP", "20"),
            ("POLYRUN_TIMEOUT_SQL", "2.5"),
        ]);
        let config = RunnerConfig::default()
            .with_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.host_path, Some(PathBuf::from("/opt/polyrun-host")));
        assert_eq!(config.output_cap, 20);
        assert_eq!(config.timeout_for(LanguageId::Sql), Duration::from_millis(2500));
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = RunnerConfig::default().with_env_from(|k| {
            (k == "POLYRUN_TIMEOUT_LUA").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_env_rejects_huge_timeout() {
        let result = RunnerConfig::default().with_env_from(|k| {
            (k == "POLYRUN_TIMEOUT_SQL").then(|| "1e300".to_string())
        });
        let Err(Error::Config(message)) = result else {
            panic!("expected a config error, got {result:?}");
        };
        assert!(message.contains("POLYRUN_TIMEOUT_SQL is out of range"));
    }

    #[test]
    fn test_timeout_from_secs() {
        assert_eq!(timeout_from_secs(1.5), Ok(Duration::from_millis(1500)));
        assert!(timeout_from_secs(0.0).is_err());
        assert!(timeout_from_secs(-3.0).is_err());
        assert!(timeout_from_secs(f64::NAN).is_err());
        assert!(timeout_from_secs(f64::INFINITY).is_err());
        assert!(timeout_from_secs(1e300).is_err());
    }
}
