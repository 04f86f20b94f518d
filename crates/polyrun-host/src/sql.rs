//! SQL on an in-memory SQLite database.
//!
//! Statements run in order on a fresh database. Each statement that returns
//! rows becomes one TABLE frame; the rest report how many rows they changed.
//! The first failing statement stops the run.

use anyhow::{Context, Result};
use polyrun_core::{ConsoleLevel, HostMessage};
use rusqlite::Connection;
use rusqlite::types::ValueRef;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use crate::session::{Outcome, Session};

/// Run `code` on a blocking thread, forwarding frames as they are produced.
pub async fn run<W: AsyncWrite + Unpin>(code: &str, session: &mut Session<W>) -> Result<Outcome> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let code = code.to_string();
    let worker = tokio::task::spawn_blocking(move || {
        execute(&code, |message| {
            // Receiver only goes away if the session failed.
            let _ = tx.send(message);
        })
    });

    while let Some(message) = rx.recv().await {
        session.send(message).await?;
    }
    worker.await.context("SQL worker panicked")
}

/// Run every statement in `code`, reporting frames through `emit`.
pub fn execute(code: &str, mut emit: impl FnMut(HostMessage)) -> Outcome {
    let conn = match Connection::open_in_memory() {
        Ok(conn) => conn,
        Err(e) => return fail(&mut emit, format!("failed to open database: {e}")),
    };

    for statement in split_statements(code) {
        tracing::debug!(%statement, "running statement");
        if let Err(e) = run_statement(&conn, &statement, &mut emit) {
            return fail(&mut emit, e.to_string());
        }
    }
    Outcome::success()
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    emit: &mut impl FnMut(HostMessage),
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(sql)?;

    if stmt.column_count() == 0 {
        let changed = stmt.execute([])?;
        emit(HostMessage::Output {
            level: ConsoleLevel::Log,
            data: vec![Value::String(describe_change(sql, changed))],
        });
        return Ok(());
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();
    let mut rows = stmt.query([])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(width);
        for idx in 0..width {
            record.push(to_json(row.get_ref(idx)?));
        }
        values.push(record);
    }

    emit(HostMessage::Table { columns, values });
    Ok(())
}

fn fail(emit: &mut impl FnMut(HostMessage), message: String) -> Outcome {
    emit(HostMessage::Error {
        message: message.clone(),
    });
    Outcome::failure(message)
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn describe_change(sql: &str, changed: usize) -> String {
    let keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    match keyword.as_str() {
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE" => {
            let noun = if changed == 1 { "row" } else { "rows" };
            format!("{changed} {noun} affected")
        }
        _ => "OK".to_string(),
    }
}

/// Split a script into statements, dropping comments.
///
/// Semicolons inside strings, quoted identifiers and trigger bodies do not
/// end a statement.
pub fn split_statements(code: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                current.push(' ');
            }
            '\'' | '"' | '`' | '[' => {
                let close = if c == '[' { ']' } else { c };
                current.push(c);
                for next in chars.by_ref() {
                    current.push(next);
                    if next == close {
                        break;
                    }
                }
            }
            ';' => {
                if in_trigger_body(&current) {
                    current.push(';');
                } else {
                    push_statement(&mut statements, &mut current);
                }
            }
            _ => current.push(c),
        }
    }
    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// A `CREATE TRIGGER` whose `BEGIN ... END` block is still open.
fn in_trigger_body(statement: &str) -> bool {
    let words: Vec<String> = statement
        .split_whitespace()
        .take(4)
        .map(str::to_ascii_uppercase)
        .collect();
    let is_trigger = words.first().is_some_and(|w| w == "CREATE")
        && words.iter().skip(1).take(2).any(|w| w == "TRIGGER");
    if !is_trigger {
        return false;
    }
    let upper = statement.to_ascii_uppercase();
    let Some(begin) = upper.find("BEGIN") else {
        return false;
    };
    let last_word = upper[begin..]
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .rfind(|w| !w.is_empty())
        .unwrap_or_default();
    last_word != "END"
}
