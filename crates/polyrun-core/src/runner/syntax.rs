//! Pre-launch syntax checks.
//!
//! Not a parser: a single pass that skips strings and comments and checks that
//! brackets balance. Catches the common paste errors without starting a host.

use crate::error::{Error, Result};
use crate::language::LanguageId;

/// Lexical rules the delimiter scan needs to know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntaxRules {
    pub line_comments: &'static [&'static str],
    pub block_comment: Option<(&'static str, &'static str)>,
    pub quotes: &'static [char],
    pub backslash_escapes: bool,
    /// Python `'''` / `"""` strings.
    pub triple_quotes: bool,
    /// Lua `[[ ... ]]` long strings.
    pub long_brackets: bool,
    /// JavaScript `/.../` regex literals.
    pub regex_literals: bool,
    /// Reject input that is only comments.
    pub require_statement: bool,
}

impl SyntaxRules {
    pub fn for_language(language: LanguageId) -> Option<Self> {
        match language {
            LanguageId::JavaScript | LanguageId::TypeScript => Some(Self {
                line_comments: &["//"],
                block_comment: Some(("/*", "*/")),
                quotes: &['\'', '"', '`'],
                backslash_escapes: true,
                triple_quotes: false,
                long_brackets: false,
                regex_literals: true,
                require_statement: false,
            }),
            LanguageId::Python => Some(Self {
                line_comments: &["#"],
                block_comment: None,
                quotes: &['\'', '"'],
                backslash_escapes: true,
                triple_quotes: true,
                long_brackets: false,
                regex_literals: false,
                require_statement: false,
            }),
            LanguageId::Lua => Some(Self {
                line_comments: &["--"],
                block_comment: Some(("--[[", "]]")),
                quotes: &['\'', '"'],
                backslash_escapes: true,
                triple_quotes: false,
                long_brackets: true,
                regex_literals: false,
                require_statement: false,
            }),
            LanguageId::Sql => Some(Self {
                line_comments: &["--"],
                block_comment: Some(("/*", "*/")),
                quotes: &['\'', '"'],
                backslash_escapes: false,
                triple_quotes: false,
                long_brackets: false,
                regex_literals: false,
                require_statement: true,
            }),
            LanguageId::Markdown => None,
        }
    }
}

/// Check that `code` has balanced delimiters and terminated strings.
pub fn check_syntax(code: &str, rules: &SyntaxRules) -> Result<()> {
    let chars: Vec<char> = code.chars().collect();
    let mut stack: Vec<(char, usize)> = Vec::new();
    let mut line = 1;
    let mut i = 0;
    let mut significant = false;
    let mut prev: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            line += 1;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if let Some((open, close)) = rules.block_comment
            && starts_with(&chars, i, open)
        {
            let start_line = line;
            let body = i + open.chars().count();
            let end = find(&chars, body, close).ok_or_else(|| {
                invalid(format!("unterminated comment starting at line {start_line}"))
            })?;
            line += newlines(&chars[body..end]);
            i = end + close.chars().count();
            continue;
        }

        if rules.line_comments.iter().any(|p| starts_with(&chars, i, p)) {
            while i < chars.len() && chars[i] != '\n' {
                i += 1;
            }
            continue;
        }

        if rules.long_brackets && starts_with(&chars, i, "[[") {
            let start_line = line;
            let end = find(&chars, i + 2, "]]").ok_or_else(|| {
                invalid(format!("unterminated long string starting at line {start_line}"))
            })?;
            line += newlines(&chars[i + 2..end]);
            i = end + 2;
            significant = true;
            prev = Some('"');
            continue;
        }

        if rules.quotes.contains(&c) {
            let start_line = line;
            if rules.triple_quotes && starts_with_repeated(&chars, i, c, 3) {
                let close: String = std::iter::repeat_n(c, 3).collect();
                let end = find(&chars, i + 3, &close).ok_or_else(|| {
                    invalid(format!("unterminated string starting at line {start_line}"))
                })?;
                line += newlines(&chars[i + 3..end]);
                i = end + 3;
            } else {
                i += 1;
                loop {
                    let Some(&d) = chars.get(i) else {
                        return Err(invalid(format!(
                            "unterminated string starting at line {start_line}"
                        )));
                    };
                    if rules.backslash_escapes && d == '\\' {
                        if chars.get(i + 1) == Some(&'\n') {
                            line += 1;
                        }
                        i += 2;
                        continue;
                    }
                    if d == c {
                        i += 1;
                        break;
                    }
                    if d == '\n' {
                        if c != '`' {
                            return Err(invalid(format!(
                                "unterminated string starting at line {start_line}"
                            )));
                        }
                        line += 1;
                    }
                    i += 1;
                }
            }
            significant = true;
            prev = Some('"');
            continue;
        }

        if rules.regex_literals && c == '/' && regex_may_start(prev, word_before(&chars, i)) {
            let start_line = line;
            i += 1;
            let mut in_class = false;
            loop {
                let Some(&d) = chars.get(i) else {
                    return Err(invalid(format!("unterminated regex at line {start_line}")));
                };
                match d {
                    '\n' => {
                        return Err(invalid(format!("unterminated regex at line {start_line}")));
                    }
                    '\\' => i += 1,
                    '[' => in_class = true,
                    ']' => in_class = false,
                    '/' if !in_class => {
                        i += 1;
                        break;
                    }
                    _ => {}
                }
                i += 1;
            }
            significant = true;
            prev = Some('"');
            continue;
        }

        match c {
            '(' | '[' | '{' => stack.push((c, line)),
            ')' | ']' | '}' => {
                let expected = opener_for(c);
                match stack.pop() {
                    Some((open, _)) if open == expected => {}
                    Some((open, open_line)) => {
                        return Err(invalid(format!(
                            "mismatched '{c}' at line {line}: '{open}' opened at line {open_line}"
                        )));
                    }
                    None => return Err(invalid(format!("unexpected '{c}' at line {line}"))),
                }
            }
            _ => {}
        }
        significant = true;
        prev = Some(c);
        i += 1;
    }

    if let Some((open, open_line)) = stack.pop() {
        return Err(invalid(format!("unclosed '{open}' opened at line {open_line}")));
    }
    if rules.require_statement && !significant {
        return Err(invalid("no statement found, only comments".to_string()));
    }
    Ok(())
}

fn invalid(message: String) -> Error {
    Error::Validation(message)
}

fn opener_for(close: char) -> char {
    match close {
        ')' => '(',
        ']' => '[',
        _ => '{',
    }
}

/// Keywords after which an expression, and so a regex, may begin.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "do", "else", "in", "instanceof", "new", "delete", "void",
    "throw", "yield", "await", "of",
];

/// A `/` starts a regex only where an expression may begin.
fn regex_may_start(prev: Option<char>, word: Option<String>) -> bool {
    match prev {
        None => true,
        Some(c) if is_word_char(c) => {
            word.is_some_and(|w| REGEX_PREFIX_KEYWORDS.contains(&w.as_str()))
        }
        Some(c) => "(,=:[!&|?{};+-*%<>~^".contains(c),
    }
}

/// The identifier ending right before `at`, skipping whitespace.
fn word_before(chars: &[char], at: usize) -> Option<String> {
    let mut end = at;
    while end > 0 && chars[end - 1].is_whitespace() {
        end -= 1;
    }
    let mut start = end;
    while start > 0 && is_word_char(chars[start - 1]) {
        start -= 1;
    }
    (start < end).then(|| chars[start..end].iter().collect())
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn starts_with(chars: &[char], at: usize, pattern: &str) -> bool {
    let mut idx = at;
    for p in pattern.chars() {
        if chars.get(idx) != Some(&p) {
            return false;
        }
        idx += 1;
    }
    true
}

fn starts_with_repeated(chars: &[char], at: usize, c: char, count: usize) -> bool {
    (0..count).all(|k| chars.get(at + k) == Some(&c))
}

fn find(chars: &[char], from: usize, pattern: &str) -> Option<usize> {
    (from..chars.len()).find(|&idx| starts_with(chars, idx, pattern))
}

fn newlines(chars: &[char]) -> usize {
    chars.iter().filter(|c| **c == '\n').count()
}
