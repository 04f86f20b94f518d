//! Polyrun host - runs one program in its own process.
//!
//! Spawned once per run by the orchestrator. Speaks the JSON-lines protocol
//! on stdin/stdout and exits after COMPLETE. Logs go to stderr.

mod script;
mod session;
mod sql;

use std::path::PathBuf;

use clap::Parser;
use polyrun_core::{CorrelationToken, LanguageId};

#[derive(Parser)]
#[command(name = "polyrun-host")]
#[command(about = "Isolated execution host for polyrun")]
#[command(version)]
struct Args {
    /// Language to run (javascript, typescript, python, sql, lua)
    #[arg(long)]
    language: String,

    /// Correlation token stamped on every frame
    #[arg(long)]
    token: String,

    /// Interpreter to use instead of the one found on PATH
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Directory for scratch files, removed by the orchestrator on teardown
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let language: LanguageId = args.language.parse()?;
    let token = CorrelationToken::from(args.token);
    tracing::debug!(%language, %token, "host starting");

    session::serve(
        language,
        args.interpreter,
        args.scratch_dir,
        token,
        tokio::io::BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}
