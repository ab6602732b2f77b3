//! Reader and writer for the line-oriented `key: value` dotfile.
//!
//! Format rules:
//! - a line ending in an unescaped backslash continues on the next line
//!   (the backslash-newline pair is swallowed)
//! - `\n`, `\r`, `\t` are escapes; any other `\c` yields `c`
//! - lines whose first non-blank character is `#`, `!` or `;` are comments
//! - keys and values are stripped of surrounding whitespace
//!
//! Parsing never fails as a whole: a malformed line produces exactly one
//! [`ConfigParseError`] and parsing continues with the next line.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Column values start at, when the key is short enough.
const VALUE_COLUMN: usize = 23;

/// Column continuation markers are aligned to.
const WRAP_COLUMN: usize = 75;

const TAB_WIDTH: usize = 8;

/// A problem with one dotfile line.
///
/// These are warnings: the offending line is skipped and the rest of
/// the file is still honoured.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigParseError {
    /// The line has no `key: value` shape.
    #[error("line {line}: unparsable line: {text}")]
    Unparsable { line: usize, text: String },

    /// The key is not one of the known preferences.
    #[error("line {line}: unknown option \"{key}\"")]
    UnknownKey { line: usize, key: String },

    /// The key is known but its value does not parse.
    #[error("line {line}: bad value for {key}: \"{value}\" ({reason})")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
        reason: String,
    },
}

impl ConfigParseError {
    /// Line number (1-based) the problem was found on.
    pub fn line(&self) -> usize {
        match self {
            Self::Unparsable { line, .. }
            | Self::UnknownKey { line, .. }
            | Self::InvalidValue { line, .. } => *line,
        }
    }
}

/// One `key: value` pair as it appeared in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DotfileEntry {
    pub key: String,
    pub value: String,
    /// First physical line of the entry (1-based); 0 for synthesized entries.
    pub line: usize,
}

/// An ordered list of dotfile entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dotfile {
    entries: Vec<DotfileEntry>,
}

impl Dotfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses dotfile text, returning the entries and one warning per
    /// malformed line.
    pub fn parse(text: &str) -> (Self, Vec<ConfigParseError>) {
        let mut entries = Vec::new();
        let mut warnings = Vec::new();

        for (line, logical) in logical_lines(text) {
            let unescaped = unescape(&logical);
            let body = strip(&unescaped);

            if body.is_empty() || body.starts_with(['#', '!', ';']) {
                continue;
            }

            let Some((key, value)) = body.split_once(':') else {
                warnings.push(ConfigParseError::Unparsable {
                    line,
                    text: body.to_string(),
                });
                continue;
            };

            let key = strip(key);
            if key.is_empty() {
                warnings.push(ConfigParseError::Unparsable {
                    line,
                    text: body.to_string(),
                });
                continue;
            }

            entries.push(DotfileEntry {
                key: key.to_string(),
                value: strip(value).to_string(),
                line,
            });
        }

        (Self { entries }, warnings)
    }

    /// Appends an entry.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push(DotfileEntry {
            key: key.into(),
            value: value.into(),
            line: 0,
        });
    }

    pub fn entries(&self) -> &[DotfileEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a key case-insensitively; the last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value.as_str())
    }

    /// Returns the key/value set with keys lowercased, each value line
    /// trimmed and blank value lines dropped. Two dotfiles with equal
    /// normalized forms configure the same thing.
    pub fn normalized(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| {
                let value = e
                    .value
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                (e.key.to_ascii_lowercase(), value)
            })
            .collect()
    }

    /// Renders the entries back into dotfile text.
    ///
    /// Multi-line values are written one line per physical line, joined
    /// with `\n\` continuations.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            write_entry(&mut out, &entry.key, &entry.value);
        }
        out
    }
}

impl fmt::Display for Dotfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

// ============================================================================
// Reading
// ============================================================================

/// Joins continuation lines, yielding `(first_line_number, text)`.
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.split('\n').enumerate() {
        let number = idx + 1;
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let (start, mut buf) = pending.take().unwrap_or((number, String::new()));

        if ends_with_continuation(raw) {
            buf.push_str(raw.get(..raw.len() - 1).unwrap_or_default());
            pending = Some((start, buf));
        } else {
            buf.push_str(raw);
            out.push((start, buf));
        }
    }

    // Trailing continuation at end of input.
    if let Some(rest) = pending {
        out.push(rest);
    }

    out
}

/// True when the line ends in an odd run of backslashes.
fn ends_with_continuation(line: &str) -> bool {
    let run = line.bytes().rev().take_while(|b| *b == b'\\').count();
    run % 2 == 1
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn strip(s: &str) -> &str {
    s.trim_matches(|c| matches!(c, ' ' | '\t' | '\r' | '\n'))
}

// ============================================================================
// Writing
// ============================================================================

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Pads from column `from` to column `to` with tabs then spaces.
fn tab_to(out: &mut String, mut from: usize, to: usize) -> usize {
    let to_mod = (to / TAB_WIDTH) * TAB_WIDTH;
    while from < to_mod {
        out.push('\t');
        from = ((from / TAB_WIDTH) + 1) * TAB_WIDTH;
    }
    while from < to {
        out.push(' ');
        from += 1;
    }
    from
}

fn write_entry(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push(':');
    let mut col = key.len() + 1;

    let lines: Vec<&str> = value.split('\n').map(strip).collect();
    let last = lines.len().saturating_sub(1);

    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            col = 0;
        }
        col = tab_to(out, col, VALUE_COLUMN.max(col + 1));
        let escaped = escape(line);
        out.push_str(&escaped);
        col += escaped.len();

        if i < last {
            tab_to(out, col, WRAP_COLUMN.max(col + 1));
            out.push_str("\\n\\\n");
        }
    }

    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_entries() {
        let text = "timeout:\t1:30:00\nlock:  True\n";
        let (file, warnings) = Dotfile::parse(text);
        assert!(warnings.is_empty());
        assert_eq!(file.len(), 2);
        assert_eq!(file.get("timeout"), Some("1:30:00"));
        assert_eq!(file.get("LOCK"), Some("True"));
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let text = "# comment\n! also\n; and this\n\n   \nfade: False\n";
        let (file, warnings) = Dotfile::parse(text);
        assert!(warnings.is_empty());
        assert_eq!(file.len(), 1);
        assert_eq!(file.entries()[0].line, 6);
    }

    #[test]
    fn test_continuation_and_escapes() {
        let text = "programs:\tqix -root \\n\\\n\t\tattraction -root\nmessage: a\\tb\\\\c\n";
        let (file, warnings) = Dotfile::parse(text);
        assert!(warnings.is_empty());
        assert_eq!(
            file.get("programs"),
            Some("qix -root \n\t\tattraction -root")
        );
        assert_eq!(file.get("message"), Some("a\tb\\c"));
        // The continued entry keeps its first physical line number.
        assert_eq!(file.entries()[0].line, 1);
        assert_eq!(file.entries()[1].line, 3);
    }

    #[test]
    fn test_escaped_trailing_backslash_is_not_continuation() {
        let text = "path: C:\\\\\nlock: True\n";
        let (file, warnings) = Dotfile::parse(text);
        assert!(warnings.is_empty());
        assert_eq!(file.get("path"), Some("C:\\"));
        assert_eq!(file.get("lock"), Some("True"));
    }

    #[test]
    fn test_one_warning_per_malformed_line() {
        let text = "timeout: 10\nthis line has no colon\nlock: True\n: no key\ncycle: 5\n";
        let (file, warnings) = Dotfile::parse(text);
        assert_eq!(file.len(), 3);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line(), 2);
        assert_eq!(warnings[1].line(), 4);
        assert!(warnings[0].to_string().contains("unparsable"));
    }

    #[test]
    fn test_last_occurrence_wins() {
        let (file, _) = Dotfile::parse("lock: False\nlock: True\n");
        assert_eq!(file.get("lock"), Some("True"));
    }

    #[test]
    fn test_render_aligns_values() {
        let mut file = Dotfile::new();
        file.push("lock", "True");
        let text = file.render();
        assert!(text.starts_with("lock:"));
        assert!(text.ends_with("True\n"));
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let inputs = [
            "timeout: 0:10:00\ncycle: 0:10:00\nlock: False\n",
            "programs:  qix -root \\n\\\n   attraction -root \\n\\\n  \\n\\\n   xroger\n",
            "textLiteral: tab\\there and back\\\\slash\n# trailing comment\n",
            "a: 1\nA: 2\n",
        ];

        for input in inputs {
            let (parsed, warnings) = Dotfile::parse(input);
            assert!(warnings.is_empty(), "{input}");
            let (reparsed, warnings) = Dotfile::parse(&parsed.render());
            assert!(warnings.is_empty(), "{input}");
            assert_eq!(parsed.normalized(), reparsed.normalized(), "{input}");
        }
    }
}
