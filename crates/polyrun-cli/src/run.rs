//! Run command implementation for Polyrun CLI.
//!
//! Reads code from `--code`, a file, or stdin, runs it through the manager
//! and streams the output. Ctrl-C stops the run.

use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use polyrun_core::config::timeout_from_secs;
use polyrun_core::{ErrorKind, LanguageId, RunnerConfig, RunnerManager};

use crate::colors;
use crate::render::TerminalPrinter;

pub struct RunArgs<'a> {
    pub file: Option<&'a Path>,
    pub language: Option<&'a str>,
    pub code: Option<&'a str>,
    pub timeout: Option<f64>,
    pub json: bool,
}

/// Execute a run. Returns whether it succeeded.
pub async fn execute(args: RunArgs<'_>, mut config: RunnerConfig) -> anyhow::Result<bool> {
    let language = resolve_language(args.language, args.file)?;
    let code = read_code(args.code, args.file)?;

    if let Some(secs) = args.timeout {
        let timeout = timeout_from_secs(secs).map_err(|reason| anyhow!("--timeout {reason}"))?;
        config.set_timeout(language, timeout);
    }

    let manager = Arc::new(RunnerManager::new(config));
    let printer = Arc::new(TerminalPrinter::new(language.display_name(), args.json));

    let interrupt = {
        let manager = Arc::clone(&manager);
        let json = args.json;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() && manager.stop() && !json {
                eprintln!("\n{}", colors::paint(colors::YELLOW, "Stopped"));
            }
        })
    };

    let result = manager.run(&code, language.as_str(), printer).await;
    interrupt.abort();
    manager.cleanup();

    if result.kind == Some(ErrorKind::Cancelled) && args.json {
        println!("{}", serde_json::json!({ "result": result }));
    }
    Ok(result.success)
}

/// `--language` if given, else the file extension.
fn resolve_language(language: Option<&str>, file: Option<&Path>) -> anyhow::Result<LanguageId> {
    if let Some(language) = language {
        return Ok(language.parse()?);
    }

    let ext = file
        .and_then(|f| f.extension())
        .and_then(|e| e.to_str())
        .context("cannot tell the language; pass --language")?;
    LanguageId::ALL
        .into_iter()
        .find(|l| l.file_extension() == ext)
        .or_else(|| ext.parse().ok())
        .with_context(|| format!("no language uses the .{ext} extension; pass --language"))
}

fn read_code(code: Option<&str>, file: Option<&Path>) -> anyhow::Result<String> {
    if let Some(code) = code {
        return Ok(code.to_string());
    }
    if let Some(file) = file {
        return std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()));
    }

    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        bail!("no code given; pass a file, --code, or pipe code on stdin");
    }
    let mut code = String::new();
    stdin
        .read_to_string(&mut code)
        .context("failed to read code from stdin")?;
    Ok(code)
}
