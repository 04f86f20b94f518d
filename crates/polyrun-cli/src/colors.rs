//! Terminal color constants and utilities for CLI output.

use std::io::{self, IsTerminal, Write};
use std::sync::OnceLock;

pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";

/// Whether stderr is a terminal and `NO_COLOR` is unset.
fn enabled() -> bool {
    static ENABLED: OnceLock<bool> = OnceLock::new();
    *ENABLED.get_or_init(|| io::stderr().is_terminal() && std::env::var_os("NO_COLOR").is_none())
}

/// Wrap `text` in `color` when colors are enabled.
pub fn paint(color: &str, text: &str) -> String {
    if enabled() {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

/// Flush stdout so streamed lines appear immediately.
#[inline]
pub fn flush_stdout() {
    io::stdout().flush().ok();
}
