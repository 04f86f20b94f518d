//! Script languages, run by an external interpreter.
//!
//! The program is written to a scratch file and run once. Each stdout line
//! becomes an OUTPUT frame and each stderr line an ERROR frame.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use polyrun_core::LanguageId;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::process::Command;

use crate::session::{Outcome, Session};

const NODE: &[&str] = &["node"];
const PYTHON: &[&str] = &["python3", "python"];
const LUA: &[&str] = &["lua", "lua5.4", "luajit"];

const NO_ARGS: &[&str] = &[];
const STRIP_TYPES: &[&str] = &["--experimental-strip-types", "--no-warnings"];
const UNBUFFERED: &[&str] = &["-u"];

/// Interpreter invocation for one language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    pub program: PathBuf,
    pub args: &'static [&'static str],
}

impl Toolchain {
    /// Pick the interpreter: an explicit override, else the first candidate on PATH.
    pub fn resolve(language: LanguageId, interpreter: Option<&Path>) -> Result<Self> {
        let (candidates, args) = match language {
            LanguageId::JavaScript => (NODE, NO_ARGS),
            LanguageId::TypeScript => (NODE, STRIP_TYPES),
            LanguageId::Python => (PYTHON, UNBUFFERED),
            LanguageId::Lua => (LUA, NO_ARGS),
            other => bail!("{other} is not run by an interpreter"),
        };

        if let Some(path) = interpreter {
            return Ok(Self {
                program: path.to_path_buf(),
                args,
            });
        }

        candidates
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|program| Self { program, args })
            .with_context(|| {
                format!(
                    "no {} interpreter found on PATH (tried {})",
                    language.display_name(),
                    candidates.join(", ")
                )
            })
    }
}

/// Run `code` and stream its output into `session`.
///
/// Errors are reserved for protocol failures; anything that goes wrong with
/// the program itself is reported in the outcome.
pub async fn run<W: AsyncWrite + Unpin>(
    language: LanguageId,
    interpreter: Option<&Path>,
    scratch_dir: Option<&Path>,
    code: &str,
    session: &mut Session<W>,
) -> Result<Outcome> {
    let toolchain = match Toolchain::resolve(language, interpreter) {
        Ok(toolchain) => toolchain,
        Err(e) => {
            let message = e.to_string();
            session.error(&message).await?;
            return Ok(Outcome::failure(message));
        }
    };
    session
        .loading(format!("starting {}", toolchain.program.display()))
        .await?;

    let suffix = format!(".{}", language.file_extension());
    let mut builder = tempfile::Builder::new();
    builder.prefix("polyrun-").suffix(&suffix);
    let mut file = match scratch_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("failed to create scratch file")?;
    file.write_all(code.as_bytes())
        .and_then(|()| file.flush())
        .context("failed to write scratch file")?;

    let spawned = Command::new(&toolchain.program)
        .args(toolchain.args)
        .arg(file.path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("PYTHONUNBUFFERED", "1")
        .kill_on_drop(true)
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            let message = format!("failed to start {}: {}", toolchain.program.display(), e);
            session.error(&message).await?;
            return Ok(Outcome::failure(message));
        }
    };
    tracing::debug!(program = %toolchain.program.display(), pid = ?child.id(), "interpreter started");

    let stdout = child.stdout.take().context("failed to get interpreter stdout")?;
    let stderr = child.stderr.take().context("failed to get interpreter stderr")?;
    let mut out = LineReader::new(stdout);
    let mut err = LineReader::new(stderr);
    let mut last_error: Option<String> = None;

    while out.is_open() || err.is_open() {
        tokio::select! {
            line = out.next_line(), if out.is_open() => {
                if let Some(line) = line {
                    session.log(&line).await?;
                }
            }
            line = err.next_line(), if err.is_open() => {
                if let Some(line) = line {
                    if !line.trim().is_empty() {
                        last_error = Some(line.clone());
                    }
                    session.error(&line).await?;
                }
            }
        }
    }

    let status = child.wait().await.context("failed to wait for interpreter")?;
    if status.success() {
        Ok(Outcome::success())
    } else {
        Ok(Outcome::failure(
            last_error.unwrap_or_else(|| format!("process exited with {status}")),
        ))
    }
}

/// Splits a program's output stream into lines.
///
/// Bytes that are not UTF-8 are replaced rather than treated as an error, so
/// one stray byte does not cut the program's output short.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    open: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            open: true,
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    /// The next complete line, or the unterminated tail once the stream ends.
    ///
    /// Cancel safe: a partially read line stays buffered for the next call.
    async fn next_line(&mut self) -> Option<String> {
        match self.reader.read_until(b'\n', &mut self.buf).await {
            Ok(0) => self.open = false,
            Ok(_) if self.buf.ends_with(b"\n") => return Some(self.take_line()),
            // No delimiter means the stream ended mid-line.
            Ok(_) => self.open = false,
            Err(e) => {
                tracing::debug!(error = %e, "interpreter stream closed with error");
                self.open = false;
            }
        }
        (!self.open && !self.buf.is_empty()).then(|| self.take_line())
    }

    fn take_line(&mut self) -> String {
        let mut end = self.buf.len();
        if self.buf[..end].ends_with(b"\n") {
            end -= 1;
        }
        if self.buf[..end].ends_with(b"\r") {
            end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buf[..end]).into_owned();
        self.buf.clear();
        line
    }
}
