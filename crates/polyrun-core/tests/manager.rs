//! Integration tests for the runner manager.
//!
//! Hosts are scripted in memory, so no interpreters are needed.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Notify;

use polyrun_core::testing::{HostScript, Notification, RecordingCallbacks, ScriptedLauncher};
use polyrun_core::{
    ErrorKind, ExecutionResult, HostMessage, LanguageId, OutputEvent, RunCallbacks, RunnerConfig,
    RunnerManager,
};

fn manager_with(launcher: Arc<ScriptedLauncher>) -> Arc<RunnerManager> {
    Arc::new(RunnerManager::with_launcher(RunnerConfig::default(), launcher))
}

async fn until(condition: impl Fn() -> bool) {
    while !condition() {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_print_scenario_streams_then_completes() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .output("1")
            .complete(true),
    );
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("print 1", "js", callbacks.clone()).await;

    assert!(result.success);
    let notifications = callbacks.notifications();
    assert_eq!(notifications.len(), 3);
    assert_eq!(notifications[0], Notification::Start);
    assert_eq!(notifications[1], Notification::Output(OutputEvent::log("1")));
    assert!(matches!(&notifications[2], Notification::Complete(r) if r.success));
    assert_eq!(launcher.received_code(), vec!["print 1".to_string()]);
}

#[tokio::test]
async fn test_empty_code_fails_without_host() {
    let launcher = ScriptedLauncher::new(HostScript::new().ready());
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("   \n\t", "js", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Validation));
    assert_eq!(callbacks.errors().len(), 1);
    assert_eq!(callbacks.starts(), 0);
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_sql_select_yields_one_table_event() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .table(&["1"], vec![vec![json!(1)]])
            .complete(true),
    );
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("select 1", "sql", callbacks.clone()).await;

    assert!(result.success);
    assert_eq!(
        callbacks.events(),
        vec![OutputEvent::Table {
            columns: vec!["1".to_string()],
            values: vec![vec![json!(1)]],
        }]
    );
    assert!(matches!(
        callbacks.notifications().last(),
        Some(Notification::Complete(_))
    ));
}

#[tokio::test]
async fn test_second_run_while_busy_is_rejected() {
    let gate = Arc::new(Notify::new());
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .wait_for(gate.clone())
            .complete(true),
    );
    let manager = manager_with(launcher.clone());

    let first = RecordingCallbacks::new();
    let pending = {
        let manager = Arc::clone(&manager);
        let first = first.clone();
        tokio::spawn(async move { manager.run("print(1)", "python", first).await })
    };
    until(|| !launcher.received_code().is_empty()).await;
    assert!(manager.is_running());

    let second = RecordingCallbacks::new();
    let rejected = manager.run("print(2)", "python", second.clone()).await;

    assert_eq!(rejected.kind, Some(ErrorKind::Concurrency));
    assert_eq!(second.errors().len(), 1);
    assert_eq!(second.starts(), 0);
    assert_eq!(launcher.launches(), 1);

    gate.notify_one();
    let result = pending.await.unwrap();
    assert!(result.success);
    assert_eq!(first.results(), 1);
    assert!(!manager.is_running());
}

#[tokio::test]
async fn test_output_cap_truncates_with_single_warning() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .burst(1_050)
            .complete(true),
    );
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("for i in range(1050): print(i)", "python", callbacks.clone()).await;

    assert!(result.success);
    let events = callbacks.events();
    assert_eq!(events.len(), 1_001);
    assert_eq!(events[0], OutputEvent::log("1"));
    assert_eq!(events[999], OutputEvent::log("1000"));
    assert_eq!(events[1_000], OutputEvent::truncated(1_000));
    assert!(events[1_000].is_truncation());
    assert!(events[..1_000].iter().all(|e| !e.is_truncation()));
    assert_eq!(callbacks.completions().len(), 1);
}

#[tokio::test]
async fn test_frames_from_previous_run_are_ignored() {
    let launcher = ScriptedLauncher::with_scripts(vec![
        HostScript::new().ready().expect_execute().complete(true),
        HostScript::new()
            .ready()
            .expect_execute()
            .stale(HostMessage::Output {
                level: Default::default(),
                data: vec![json!("ghost")],
            })
            .stale(HostMessage::Complete {
                success: false,
                duration_ms: Some(1),
                error: Some("stale failure".to_string()),
            })
            .output("real")
            .complete(true),
    ]);
    let manager = manager_with(launcher.clone());

    assert!(manager.run("print 1", "lua", RecordingCallbacks::new()).await.success);

    let callbacks = RecordingCallbacks::new();
    let result = manager.run("print 2", "lua", callbacks.clone()).await;

    assert!(result.success);
    assert_eq!(callbacks.events(), vec![OutputEvent::log("real")]);
    assert_eq!(callbacks.results(), 1);
    let tokens = launcher.tokens();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_releases_host() {
    let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().hang());
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let started = tokio::time::Instant::now();
    let result = manager.run("while(true){}", "javascript", callbacks.clone()).await;

    assert!(result.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(15));
    assert_eq!(callbacks.errors(), vec![result]);
    assert!(callbacks.completions().is_empty());
    assert_eq!(launcher.terminations(), 1);
    assert!(!manager.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_is_honored() {
    let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().hang());
    let mut config = RunnerConfig::default();
    config.set_timeout(LanguageId::Python, Duration::from_secs(2));
    let manager = RunnerManager::with_launcher(config, launcher);

    let started = tokio::time::Instant::now();
    let result = manager.run("x = 1", "py", RecordingCallbacks::new()).await;

    assert!(result.is_timeout());
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_stop_suppresses_further_callbacks() {
    let gate = Arc::new(Notify::new());
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .output("before")
            .wait_for(gate.clone())
            .output("after")
            .complete(true),
    );
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let pending = {
        let manager = Arc::clone(&manager);
        let callbacks = callbacks.clone();
        tokio::spawn(async move { manager.run("print(1)", "ts", callbacks).await })
    };
    until(|| !callbacks.events().is_empty()).await;

    assert!(manager.stop());
    gate.notify_one();
    let result = pending.await.unwrap();

    assert_eq!(result.kind, Some(ErrorKind::Cancelled));
    assert_eq!(callbacks.events(), vec![OutputEvent::log("before")]);
    assert_eq!(callbacks.results(), 0);
    assert_eq!(launcher.terminations(), 1);
    assert!(!manager.is_running());
    assert!(!manager.stop());
}

#[tokio::test]
async fn test_host_crash_reports_exactly_one_error() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .error("Segmentation fault")
            .exit(),
    );
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("crash()", "python", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Runtime));
    assert!(result.error.as_deref().unwrap().contains("Segmentation fault"));
    assert_eq!(callbacks.results(), 1);
    assert_eq!(callbacks.errors().len(), 1);
}

#[tokio::test]
async fn test_launch_failure_reports_initialization_error() {
    let launcher = ScriptedLauncher::failing("no interpreter found");
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("print(1)", "python", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Initialization));
    assert!(callbacks.events().is_empty());
    assert_eq!(callbacks.errors().len(), 1);
}

#[tokio::test]
async fn test_markdown_renders_without_host() {
    let launcher = ScriptedLauncher::new(HostScript::new());
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("# Hello\n\nworld", "md", callbacks.clone()).await;

    assert!(result.success);
    let events = callbacks.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], OutputEvent::Preview { html } if html.contains("<h1>Hello</h1>")));
    assert_eq!(launcher.launches(), 0);
}

#[tokio::test]
async fn test_disabled_language_is_rejected() {
    let launcher = ScriptedLauncher::new(HostScript::new());
    let config = RunnerConfig {
        disabled: vec![LanguageId::Lua],
        ..RunnerConfig::default()
    };
    let manager = RunnerManager::with_launcher(config, launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("print(1)", "lua", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Validation));
    assert!(!manager.get_all_languages().contains(&LanguageId::Lua));
    assert_eq!(launcher.launches(), 0);
}

/// Calls `stop()` on its manager from inside `on_start`.
#[derive(Default)]
struct StopOnStart {
    manager: Mutex<Weak<RunnerManager>>,
    inner: Arc<RecordingCallbacks>,
}

impl RunCallbacks for StopOnStart {
    fn on_start(&self) {
        self.inner.on_start();
        if let Some(manager) = self.manager.lock().unwrap().upgrade() {
            assert!(manager.stop());
        }
    }

    fn on_output(&self, event: OutputEvent) {
        self.inner.on_output(event);
    }

    fn on_complete(&self, result: &ExecutionResult) {
        self.inner.on_complete(result);
    }

    fn on_error(&self, result: &ExecutionResult) {
        self.inner.on_error(result);
    }
}

#[tokio::test(start_paused = true)]
async fn test_stop_from_on_start_launches_nothing() {
    let launcher = ScriptedLauncher::new(HostScript::new().ready().expect_execute().hang());
    let manager = manager_with(launcher.clone());
    let callbacks = Arc::new(StopOnStart::default());
    *callbacks.manager.lock().unwrap() = Arc::downgrade(&manager);

    let started = tokio::time::Instant::now();
    let result = manager.run("print(1)", "python", callbacks.clone()).await;

    assert_eq!(result.kind, Some(ErrorKind::Cancelled));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(launcher.launches(), 0);
    assert_eq!(callbacks.inner.starts(), 1);
    assert_eq!(callbacks.inner.results(), 0);
    assert!(!manager.is_running());

    // The slot is free again for the next run.
    let next = manager.run("print(2)", "python", RecordingCallbacks::new()).await;
    assert!(next.is_timeout());
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test]
async fn test_loading_becomes_info_event() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .loading("starting python3")
            .output("1")
            .complete(true),
    );
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    assert!(manager.run("print(1)", "py", callbacks.clone()).await.success);

    assert_eq!(
        callbacks.events(),
        vec![
            OutputEvent::Info {
                message: "starting python3".to_string()
            },
            OutputEvent::log("1"),
        ]
    );
}

#[tokio::test]
async fn test_malformed_frames_are_discarded() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .raw("this is not json")
            .raw(r#"{"type":"PY_SHRUG","token":"whatever"}"#)
            .raw(r#"{"type":"JS_OUTPUT","level":"log","data":["wrong prefix"]}"#)
            .output("kept")
            .complete(true),
    );
    let manager = manager_with(launcher);
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("print('kept')", "python", callbacks.clone()).await;

    assert!(result.success);
    assert_eq!(callbacks.events(), vec![OutputEvent::log("kept")]);
    assert_eq!(callbacks.results(), 1);
}

#[tokio::test]
async fn test_stale_ready_does_not_start_the_run() {
    let launcher = ScriptedLauncher::with_scripts(vec![
        HostScript::new().ready().expect_execute().complete(true),
        HostScript::new()
            .stale(HostMessage::Ready)
            .output("before ready")
            .ready()
            .expect_execute()
            .output("after ready")
            .complete(true),
    ]);
    let manager = manager_with(launcher.clone());

    assert!(manager.run("print 1", "lua", RecordingCallbacks::new()).await.success);

    let callbacks = RecordingCallbacks::new();
    assert!(manager.run("print 2", "lua", callbacks.clone()).await.success);

    assert_eq!(callbacks.events(), vec![OutputEvent::log("after ready")]);
    assert_eq!(
        launcher.received_code(),
        vec!["print 1".to_string(), "print 2".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_slow_host_loses_to_the_timer() {
    let launcher = ScriptedLauncher::new(
        HostScript::new()
            .ready()
            .expect_execute()
            .output("working")
            .delay(Duration::from_secs(60))
            .output("too late")
            .complete(true),
    );
    let manager = manager_with(launcher.clone());
    let callbacks = RecordingCallbacks::new();

    let result = manager.run("SELECT 1;", "sql", callbacks.clone()).await;

    assert!(result.is_timeout());
    assert_eq!(result.error.as_deref(), Some("execution timed out after 20s"));
    assert_eq!(callbacks.events(), vec![OutputEvent::log("working")]);
    assert!(callbacks.completions().is_empty());
    assert_eq!(launcher.terminations(), 1);
}

