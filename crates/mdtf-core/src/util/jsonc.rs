use crate::domain::{FrameworkError, FrameworkResult};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Position-carrying syntax error for a permissive JSON document. Line and
/// column refer to the original text, comments included.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}, column {column}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub reason: String,
}

/// Blanks `//` line comments and `/* */` block comments with spaces,
/// leaving newlines in place so positions reported against the stripped
/// text match the original. Comment markers inside string literals are
/// left alone.
pub fn strip_json_comments(text: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        InString,
        Escaped,
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(text.len());
    let mut state = State::Code;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match state {
            State::Code => match ch {
                '"' => {
                    state = State::InString;
                    out.push(ch);
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = State::BlockComment;
                }
                _ => out.push(ch),
            },
            State::InString => match ch {
                '\\' => {
                    state = State::Escaped;
                    out.push(ch);
                }
                '"' => {
                    state = State::Code;
                    out.push(ch);
                }
                _ => out.push(ch),
            },
            State::Escaped => {
                state = State::InString;
                out.push(ch);
            }
            State::LineComment => {
                if ch == '\n' {
                    state = State::Code;
                    out.push(ch);
                } else {
                    out.push(' ');
                }
            }
            State::BlockComment => {
                if ch == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = State::Code;
                } else if ch == '\n' {
                    out.push(ch);
                } else {
                    out.push(' ');
                }
            }
        }
    }

    out
}

pub fn parse_permissive_json(text: &str) -> Result<Value, ParseError> {
    let stripped = strip_json_comments(text);
    serde_json::from_str(&stripped).map_err(|source| ParseError {
        line: source.line(),
        column: source.column(),
        reason: source.to_string(),
    })
}

/// Loads a permissive JSON file. A missing file is `CONFIG.FILE_MISSING`; a
/// syntax error carries the path plus the position within the file.
pub fn load_json_file(path: &Path) -> FrameworkResult<Value> {
    let text = fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            FrameworkError::config_missing(
                "CONFIG.FILE_MISSING",
                format!("configuration file '{}' does not exist", path.display()),
            )
        } else {
            FrameworkError::io_system(
                "IO.READ",
                format!("failed to read '{}': {}", path.display(), source),
            )
        }
    })?;
    parse_permissive_json(&text).map_err(|source| {
        FrameworkError::config_syntax(
            "CONFIG.SYNTAX",
            format!("{}: {}", path.display(), source),
        )
    })
}

/// Pretty-prints `value` with a trailing newline. A load/write/load cycle
/// is state-identical (comments from the original file are not preserved).
pub fn write_json_file(path: &Path, value: &Value) -> FrameworkResult<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|source| {
        FrameworkError::io_system(
            "IO.WRITE",
            format!("failed to serialize '{}': {}", path.display(), source),
        )
    })?;
    fs::write(path, format!("{rendered}\n")).map_err(|source| {
        FrameworkError::io_system(
            "IO.WRITE",
            format!("failed to write '{}': {}", path.display(), source),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::{load_json_file, parse_permissive_json, strip_json_comments, write_json_file};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn line_and_block_comments_are_blanked() {
        let text = "{\n  // leading note\n  \"a\": 1, /* inline */ \"b\": 2\n}\n";
        let parsed = parse_permissive_json(text).expect("comments stripped");
        assert_eq!(parsed, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let text = r#"{"url": "ftp://host/pub", "note": "a \"quoted\" // not a comment"}"#;
        let parsed = parse_permissive_json(text).expect("string content untouched");
        assert_eq!(parsed["url"], "ftp://host/pub");
        assert_eq!(parsed["note"], "a \"quoted\" // not a comment");
    }

    #[test]
    fn stripping_preserves_line_and_column_positions() {
        // The trailing comma makes the closing brace the point of failure;
        // with comments blanked rather than removed it stays on line 4.
        let text = "{\n  // two comment lines\n  \"a\": 1,\n}\n";
        let error = parse_permissive_json(text).expect_err("trailing comma is invalid");
        assert_eq!(error.line, 4);
        assert_eq!(error.column, 1);

        let stripped = strip_json_comments(text);
        assert_eq!(stripped.lines().count(), text.lines().count());
    }

    #[test]
    fn load_write_load_is_state_identical() {
        let dir = TempDir::new().expect("temp dir");
        let original = dir.path().join("defaults.jsonc");
        std::fs::write(
            &original,
            "// defaults\n{\"site\": \"local\", \"depth\": 3}\n",
        )
        .expect("write fixture");

        let first = load_json_file(&original).expect("first load");
        let copy = dir.path().join("copy.json");
        write_json_file(&copy, &first).expect("write back");
        let second = load_json_file(&copy).expect("second load");
        assert_eq!(first, second);

        let written = std::fs::read_to_string(&copy).expect("read back");
        assert!(written.ends_with('\n'));
    }

    #[test]
    fn missing_file_reports_config_missing() {
        let dir = TempDir::new().expect("temp dir");
        let error = load_json_file(&dir.path().join("absent.jsonc")).expect_err("no file");
        assert_eq!(error.code(), "CONFIG.FILE_MISSING");
    }
}
