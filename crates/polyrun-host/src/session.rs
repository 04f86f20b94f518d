//! Host side of the protocol.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use polyrun_core::{ConsoleLevel, CorrelationToken, ExecuteRequest, HostMessage, LanguageId};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::{script, sql};

/// How user code finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub error: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Writes this run's frames.
pub struct Session<W> {
    prefix: &'static str,
    token: CorrelationToken,
    writer: W,
}

impl<W: AsyncWrite + Unpin> Session<W> {
    pub fn new(prefix: &'static str, token: CorrelationToken, writer: W) -> Self {
        Self {
            prefix,
            token,
            writer,
        }
    }

    pub async fn send(&mut self, message: HostMessage) -> Result<()> {
        let line = message.encode(self.prefix, &self.token)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .context("failed to write frame")?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// One line of program output.
    pub async fn log(&mut self, line: &str) -> Result<()> {
        self.send(HostMessage::Output {
            level: ConsoleLevel::Log,
            data: vec![Value::String(line.to_string())],
        })
        .await
    }

    pub async fn error(&mut self, message: &str) -> Result<()> {
        self.send(HostMessage::Error {
            message: message.to_string(),
        })
        .await
    }

    pub async fn loading(&mut self, message: String) -> Result<()> {
        self.send(HostMessage::Loading { message }).await
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Read requests until one carries `token`. `None` if input closes first.
pub async fn wait_for_code<R: AsyncBufRead + Unpin>(
    reader: R,
    prefix: &str,
    token: &CorrelationToken,
) -> Result<Option<String>> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        match ExecuteRequest::decode(&line, prefix) {
            Ok((received, request)) if &received == token => return Ok(Some(request.code)),
            Ok((received, _)) => {
                tracing::debug!(stale = %received, "ignoring request for another run")
            }
            Err(e) => tracing::debug!(error = %e, "ignoring unreadable request"),
        }
    }
    Ok(None)
}

/// Announce readiness, run the one program we are sent, report completion.
pub async fn serve<R, W>(
    language: LanguageId,
    interpreter: Option<PathBuf>,
    scratch_dir: Option<PathBuf>,
    token: CorrelationToken,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let prefix = language
        .protocol_prefix()
        .with_context(|| format!("{language} does not run in a host"))?;

    let mut session = Session::new(prefix, token.clone(), writer);
    session.send(HostMessage::Ready).await?;

    let Some(code) = wait_for_code(reader, prefix, &token).await? else {
        tracing::debug!("input closed before a request arrived");
        return Ok(());
    };

    let started = Instant::now();
    let outcome = match language {
        LanguageId::Sql => sql::run(&code, &mut session).await?,
        _ => {
            script::run(
                language,
                interpreter.as_deref(),
                scratch_dir.as_deref(),
                &code,
                &mut session,
            )
            .await?
        }
    };
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::debug!(%language, success = outcome.success, duration_ms, "program finished");

    session
        .send(HostMessage::Complete {
            success: outcome.success,
            duration_ms: Some(duration_ms),
            error: outcome.error,
        })
        .await
}
