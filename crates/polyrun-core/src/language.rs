//! Supported languages.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Identifier of a supported language.
///
/// Each variant maps to exactly one runner in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    JavaScript,
    TypeScript,
    Python,
    Sql,
    Lua,
    Markdown,
}

impl LanguageId {
    /// All languages in display order.
    pub const ALL: [LanguageId; 6] = [
        LanguageId::JavaScript,
        LanguageId::TypeScript,
        LanguageId::Python,
        LanguageId::Sql,
        LanguageId::Lua,
        LanguageId::Markdown,
    ];

    /// Canonical lowercase id.
    pub fn as_str(self) -> &'static str {
        match self {
            LanguageId::JavaScript => "javascript",
            LanguageId::TypeScript => "typescript",
            LanguageId::Python => "python",
            LanguageId::Sql => "sql",
            LanguageId::Lua => "lua",
            LanguageId::Markdown => "markdown",
        }
    }

    /// Human readable name.
    pub fn display_name(self) -> &'static str {
        match self {
            LanguageId::JavaScript => "JavaScript",
            LanguageId::TypeScript => "TypeScript",
            LanguageId::Python => "Python",
            LanguageId::Sql => "SQL",
            LanguageId::Lua => "Lua",
            LanguageId::Markdown => "Markdown",
        }
    }

    /// Message-type prefix used on the host protocol.
    ///
    /// `None` for languages that run without an isolated host.
    pub fn protocol_prefix(self) -> Option<&'static str> {
        match self {
            LanguageId::JavaScript => Some("JS"),
            LanguageId::TypeScript => Some("TS"),
            LanguageId::Python => Some("PY"),
            LanguageId::Sql => Some("SQL"),
            LanguageId::Lua => Some("LUA"),
            LanguageId::Markdown => None,
        }
    }

    /// Default wall-clock limit, sized by expected cold-start cost.
    pub fn default_timeout(self) -> Duration {
        match self {
            LanguageId::JavaScript | LanguageId::Lua => Duration::from_secs(15),
            LanguageId::Sql => Duration::from_secs(20),
            LanguageId::TypeScript | LanguageId::Python => Duration::from_secs(30),
            LanguageId::Markdown => Duration::from_secs(5),
        }
    }

    /// Whether runs of this language go through an isolated host.
    pub fn is_isolated(self) -> bool {
        self.protocol_prefix().is_some()
    }

    /// Source file extension used by the host for scratch files.
    pub fn file_extension(self) -> &'static str {
        match self {
            LanguageId::JavaScript => "mjs",
            LanguageId::TypeScript => "ts",
            LanguageId::Python => "py",
            LanguageId::Sql => "sql",
            LanguageId::Lua => "lua",
            LanguageId::Markdown => "md",
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LanguageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "javascript" | "js" | "node" => Ok(LanguageId::JavaScript),
            "typescript" | "ts" => Ok(LanguageId::TypeScript),
            "python" | "py" | "python3" => Ok(LanguageId::Python),
            "sql" | "sqlite" => Ok(LanguageId::Sql),
            "lua" => Ok(LanguageId::Lua),
            "markdown" | "md" => Ok(LanguageId::Markdown),
            _ => Err(Error::UnknownLanguage(s.to_string())),
        }
    }
}
