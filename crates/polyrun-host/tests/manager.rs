//! Runs programs through the manager against the real host binary.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::json;

use polyrun_core::testing::RecordingCallbacks;
use polyrun_core::{ErrorKind, LanguageId, OutputEvent, RunnerConfig, RunnerManager};

fn manager_with(config: RunnerConfig) -> RunnerManager {
    RunnerManager::new(RunnerConfig {
        host_path: Some(PathBuf::from(env!("CARGO_BIN_EXE_polyrun-host"))),
        ..config
    })
}

#[tokio::test]
async fn test_sql_runs_in_a_spawned_host() {
    let manager = manager_with(RunnerConfig::default());
    let callbacks = RecordingCallbacks::new();

    let result = manager
        .run("SELECT 1 AS one, 'a' AS two;", "sql", callbacks.clone())
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(
        callbacks.events(),
        vec![OutputEvent::Table {
            columns: vec!["one".to_string(), "two".to_string()],
            values: vec![vec![json!(1), json!("a")]],
        }]
    );
    assert_eq!(callbacks.completions().len(), 1);
    assert!(!manager.is_running());
}

/// True while the process exists and is not a zombie.
#[cfg(target_os = "linux")]
fn is_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat
            .rsplit_once(')')
            .is_some_and(|(_, rest)| !rest.trim_start().starts_with('Z')),
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_interpreter_and_removes_scratch_file() {
    if which::which("python3").is_err() {
        return;
    }
    let report_dir = tempfile::TempDir::new().unwrap();
    let report = report_dir.path().join("report");

    let mut config = RunnerConfig::default();
    config.set_timeout(LanguageId::Python, Duration::from_secs(3));
    let manager = manager_with(config);
    let callbacks = RecordingCallbacks::new();

    let code = format!(
        "import os, time\n\
         with open({report:?}, 'w') as f:\n    f.write(f'{{os.getpid()}}\\n{{__file__}}')\n\
         while True:\n    time.sleep(0.05)\n",
        report = report.display().to_string(),
    );
    let result = manager.run(&code, "python", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Timeout), "{result:?}");
    let report = std::fs::read_to_string(&report).unwrap();
    let (pid, scratch) = report.split_once('\n').unwrap();
    let pid: u32 = pid.parse().unwrap();
    let scratch = PathBuf::from(scratch);

    let mut waited = Duration::ZERO;
    while is_alive(pid) && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        waited += Duration::from_millis(50);
    }
    assert!(!is_alive(pid), "interpreter {pid} outlived its host");
    assert!(!scratch.exists(), "{} was left behind", scratch.display());
}
