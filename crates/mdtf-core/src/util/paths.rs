use crate::domain::{FrameworkError, FrameworkResult};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Expands `${VAR}` and `$VAR` references against the process environment.
/// Unset variables are left literal, as are a trailing `$` and an empty
/// `${}`; expansion never fails.
pub fn expand_env_vars(input: &str) -> String {
    expand_env_vars_with(input, |name| std::env::var(name).ok())
}

pub fn expand_env_vars_with(
    input: &str,
    lookup: impl Fn(&str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((index, ch)) = chars.next() {
        if ch != '$' {
            out.push(ch);
            continue;
        }

        match chars.peek() {
            Some(&(brace_start, '{')) => {
                let rest = &input[brace_start + 1..];
                let Some(close) = rest.find('}') else {
                    out.push_str(&input[index..]);
                    break;
                };
                let name = &rest[..close];
                let end_byte = brace_start + 2 + close;
                if !name.is_empty() && is_var_name(name) {
                    if let Some(value) = lookup(name) {
                        out.push_str(&value);
                    } else {
                        out.push_str(&input[index..end_byte]);
                    }
                } else {
                    out.push_str(&input[index..end_byte]);
                }
                while chars.peek().is_some_and(|&(position, _)| position < end_byte) {
                    chars.next();
                }
            }
            Some(&(name_start, first)) if first == '_' || first.is_ascii_alphanumeric() => {
                let tail = &input[name_start..];
                let name_len = tail
                    .find(|c: char| c != '_' && !c.is_ascii_alphanumeric())
                    .unwrap_or(tail.len());
                let name = &tail[..name_len];
                if let Some(value) = lookup(name) {
                    out.push_str(&value);
                } else {
                    out.push('$');
                    out.push_str(name);
                }
                let end_byte = name_start + name_len;
                while chars.peek().is_some_and(|&(position, _)| position < end_byte) {
                    chars.next();
                }
            }
            _ => out.push('$'),
        }
    }

    out
}

fn is_var_name(name: &str) -> bool {
    name.chars().all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Expands environment references in `path`, then returns it unchanged if
/// absolute and joined onto `code_root` otherwise. Never touches the
/// filesystem.
pub fn resolve_path(path: &str, code_root: &Path) -> PathBuf {
    let expanded = expand_env_vars(path);
    let candidate = Path::new(&expanded);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        code_root.join(candidate)
    }
}

/// Recursively searches `root` for files whose basename equals `name` and
/// requires exactly `expected` matches. Matches are returned sorted so
/// repeated searches are deterministic.
pub fn find_files(root: &Path, name: &str, expected: usize) -> FrameworkResult<Vec<PathBuf>> {
    let mut matches: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == name)
        .map(|entry| entry.into_path())
        .collect();
    matches.sort();

    if matches.len() < expected {
        return Err(FrameworkError::config_missing(
            "FILES.NOT_FOUND",
            format!(
                "expected {} file(s) named '{}' under '{}', found {}",
                expected,
                name,
                root.display(),
                matches.len()
            ),
        ));
    }
    if matches.len() > expected {
        return Err(FrameworkError::io_system(
            "FILES.AMBIGUOUS",
            format!(
                "expected {} file(s) named '{}' under '{}', found {}",
                expected,
                name,
                root.display(),
                matches.len()
            ),
        ));
    }
    Ok(matches)
}
