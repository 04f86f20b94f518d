//! Polyrun CLI - run code in isolated, time-limited hosts.

mod colors;
mod render;
mod run;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use polyrun_core::{RunnerConfig, RunnerManager};

#[derive(Parser)]
#[command(name = "polyrun")]
#[command(about = "Run JavaScript, TypeScript, Python, SQL, Lua and Markdown in isolated hosts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON config file (timeouts, output cap, host path, interpreters)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a file, inline code, or code piped on stdin
    Run {
        /// Source file; the language is taken from its extension
        file: Option<PathBuf>,

        /// Language id or alias (js, ts, py, sql, lua, md)
        #[arg(short, long)]
        language: Option<String>,

        /// Inline code instead of a file
        #[arg(short, long)]
        code: Option<String>,

        /// Timeout in seconds, overriding the language default
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Print events and the result as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List enabled languages
    Languages,

    /// Print example code for a language
    Example {
        /// Language id or alias
        language: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format polyrun-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(polyrun_err) = err.downcast_ref::<polyrun_core::Error>() {
            anyhow::anyhow!("{}", polyrun_err.with_hint())
        } else {
            err
        }
    };

    let config = load_config(cli.config.as_deref()).map_err(format_error)?;

    match cli.command {
        Commands::Run {
            file,
            language,
            code,
            timeout,
            json,
        } => {
            let args = run::RunArgs {
                file: file.as_deref(),
                language: language.as_deref(),
                code: code.as_deref(),
                timeout,
                json,
            };
            let success = run::execute(args, config).await.map_err(format_error)?;
            return Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }

        Commands::Languages => list_languages(config),

        Commands::Example { language } => {
            let manager = RunnerManager::new(config);
            match manager.get_example_code(&language) {
                Some(code) => print!("{code}"),
                None => anyhow::bail!("no example for '{language}': unknown or disabled language"),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RunnerConfig> {
    let config = match path {
        Some(path) => RunnerConfig::load(path)?,
        None => RunnerConfig::default(),
    };
    Ok(config.with_env()?)
}

fn list_languages(config: RunnerConfig) {
    let manager = RunnerManager::new(config);

    println!("{}", colors::paint(colors::BOLD, "Languages:"));
    for language in manager.get_all_languages() {
        let limit = match manager.timeout_for(language) {
            Some(timeout) => format!("timeout {}s", timeout.as_secs_f64()),
            None => "in-process".to_string(),
        };
        println!(
            "  {} {:<12} {}",
            colors::paint(colors::CYAN, &format!("{:<12}", language.as_str())),
            language.display_name(),
            limit
        );
    }
}
