use crate::domain::{FrameworkError, FrameworkResult};

/// Truncates `line` at the first `#` that starts a word outside of single
/// or double quotes. A `#` embedded in a word (`file#1`) is data, matching
/// shell comment rules.
pub fn strip_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    let mut escaped = false;
    let mut at_word_start = true;

    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            at_word_start = false;
            continue;
        }
        match ch {
            '\\' if !in_single => {
                escaped = true;
                at_word_start = false;
            }
            '\'' if !in_double => {
                in_single = !in_single;
                at_word_start = false;
            }
            '"' if !in_single => {
                in_double = !in_double;
                at_word_start = false;
            }
            '#' if !in_single && !in_double && at_word_start => {
                return &line[..index];
            }
            _ => {
                at_word_start = ch.is_whitespace();
            }
        }
    }
    line
}

/// Splits a CLI-token input file into argv words: per-line `#` comments,
/// shell-style quoting, blank lines ignored.
pub fn split_token_file(text: &str) -> FrameworkResult<Vec<String>> {
    let mut tokens = Vec::new();
    for (line_number, line) in text.lines().enumerate() {
        let stripped = strip_comment(line);
        if stripped.trim().is_empty() {
            continue;
        }
        let words = shlex::split(stripped).ok_or_else(|| {
            FrameworkError::config_syntax(
                "CONFIG.TOKEN_FILE",
                format!(
                    "unbalanced quote in CLI token file at line {}",
                    line_number + 1
                ),
            )
        })?;
        tokens.extend(words);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::{split_token_file, strip_comment};

    #[test]
    fn comment_starts_only_at_word_boundaries() {
        assert_eq!(strip_comment("--out /data # note"), "--out /data ");
        assert_eq!(strip_comment("# whole line"), "");
        assert_eq!(strip_comment("--tag file#1"), "--tag file#1");
        assert_eq!(strip_comment("--msg '# not a comment'"), "--msg '# not a comment'");
        assert_eq!(strip_comment("--msg \"keep # this\" # drop"), "--msg \"keep # this\" ");
    }

    #[test]
    fn token_file_splits_into_argv_words() {
        let text = "--output-dir /from/tokens  # comment\n--verbose\n\n# full-line comment\n--title 'two words'\n";
        let tokens = split_token_file(text).expect("valid token file");
        assert_eq!(
            tokens,
            vec![
                "--output-dir".to_string(),
                "/from/tokens".to_string(),
                "--verbose".to_string(),
                "--title".to_string(),
                "two words".to_string(),
            ]
        );
    }

    #[test]
    fn unbalanced_quote_reports_line_number() {
        let error = split_token_file("--ok fine\n--bad 'unclosed\n").expect_err("bad quoting");
        assert_eq!(error.code(), "CONFIG.TOKEN_FILE");
        assert!(error.message().contains("line 2"), "{}", error.message());
    }
}
