//! Prints run notifications to the terminal.
//!
//! Program output goes to stdout, status and diagnostics to stderr. With
//! `--json` every notification is one JSON line on stdout instead.

use polyrun_core::{ConsoleLevel, ErrorKind, ExecutionResult, OutputEvent, RunCallbacks};
use serde_json::{Value, json};

use crate::colors;

/// [`RunCallbacks`] for a terminal.
pub struct TerminalPrinter {
    label: String,
    json: bool,
}

impl TerminalPrinter {
    pub fn new(label: impl Into<String>, json: bool) -> Self {
        Self {
            label: label.into(),
            json,
        }
    }

    fn emit_json(&self, value: Value) {
        println!("{value}");
        colors::flush_stdout();
    }
}

impl RunCallbacks for TerminalPrinter {
    fn on_start(&self) {
        if self.json {
            self.emit_json(json!({ "start": self.label }));
        } else {
            eprintln!("{}", colors::paint(colors::DIM, &format!("Running {}...", self.label)));
        }
    }

    fn on_output(&self, event: OutputEvent) {
        if self.json {
            self.emit_json(json!({ "event": event }));
            return;
        }

        match event {
            OutputEvent::Output { console, data, .. } => {
                let line = format_values(&data);
                match console {
                    ConsoleLevel::Warn => eprintln!("{}", colors::paint(colors::YELLOW, &line)),
                    ConsoleLevel::Error => eprintln!("{}", colors::paint(colors::RED, &line)),
                    _ => {
                        println!("{line}");
                        colors::flush_stdout();
                    }
                }
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", colors::paint(colors::DIM, &message));
            }
            OutputEvent::Error { message } => {
                eprintln!("{}", colors::paint(colors::RED, &message));
            }
            OutputEvent::Table { columns, values } => {
                print!("{}", format_table(&columns, &values));
                colors::flush_stdout();
            }
            OutputEvent::Preview { html } => {
                print!("{html}");
                colors::flush_stdout();
            }
        }
    }

    fn on_complete(&self, result: &ExecutionResult) {
        if self.json {
            self.emit_json(json!({ "result": result }));
        } else {
            eprintln!(
                "{} in {}ms",
                colors::paint(colors::GREEN, "Completed"),
                result.duration_ms
            );
        }
    }

    fn on_error(&self, result: &ExecutionResult) {
        if self.json {
            self.emit_json(json!({ "result": result }));
            return;
        }

        let message = result.error.as_deref().unwrap_or("execution failed");
        eprintln!("{} {}", colors::paint(colors::RED, "Failed:"), message);
        if let Some(hint) = result.kind.and_then(hint_for) {
            eprintln!("  {}", colors::paint(colors::DIM, &format!("hint: {hint}")));
        }
    }
}

fn hint_for(kind: ErrorKind) -> Option<&'static str> {
    match kind {
        ErrorKind::Concurrency => Some("wait for the current run to finish or stop it first"),
        ErrorKind::Initialization => {
            Some("make sure polyrun-host and the language interpreter are installed")
        }
        ErrorKind::Timeout => Some("raise the limit with --timeout or POLYRUN_TIMEOUT_<LANG>"),
        _ => None,
    }
}

/// Console arguments joined by spaces; strings print bare.
pub fn format_values(data: &[Value]) -> String {
    data.iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// A plain-text grid with one header row.
pub fn format_table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|value| match value {
                    Value::Null => "NULL".to_string(),
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in &cells {
        for (idx, cell) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(idx) {
                *width = (*width).max(cell.chars().count());
            }
        }
    }

    let render_row = |row: &[String]| -> String {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(idx, width)| {
                let cell = row.get(idx).map(String::as_str).unwrap_or("");
                format!("{cell:<width$}")
            })
            .collect();
        format!("{}\n", padded.join(" | ").trim_end())
    };

    let mut out = render_row(columns);
    let rule: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
    out.push_str(&rule.join("─┼─"));
    out.push('\n');
    for row in &cells {
        out.push_str(&render_row(row));
    }
    let noun = if cells.len() == 1 { "row" } else { "rows" };
    out.push_str(&format!("({} {})\n", cells.len(), noun));
    out
}
