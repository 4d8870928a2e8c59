//! Line-oriented `KEY=VALUE` env-file parser.
//!
//! Comments start with `#` at the beginning of a line or after whitespace.
//! Values may be wrapped in single quotes (literal) or double quotes
//! (`$VAR`/`${VAR}` expanded). Unquoted values are expanded and may carry a
//! trailing comment. References are resolved against the process environment
//! as it exists at parse time; undefined references expand to empty.

use super::error::{ConfigError, ConfigResult};
use std::path::Path;

/// Parse an env file from disk, returning `(key, value)` pairs in file order.
pub fn parse_env_file(path: &Path) -> ConfigResult<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_env_str(&content, path)
}

/// Parse env-file content. `path` is used for error reporting only.
pub fn parse_env_str(content: &str, path: &Path) -> ConfigResult<Vec<(String, String)>> {
    let mut vars = Vec::new();

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let err = |message: &str| ConfigError::EnvFile {
            path: path.to_path_buf(),
            line: line_no,
            message: message.to_string(),
        };

        let eq = line.find('=').ok_or_else(|| err("missing '='"))?;
        let key = line[..eq].trim_end();
        if !is_valid_key(key) {
            return Err(err(&format!("invalid variable name '{key}'")));
        }

        let raw_value = line[eq + 1..].trim_start();
        let value = parse_value(raw_value, path, line_no)?;
        vars.push((key.to_string(), value));
    }

    Ok(vars)
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_value(raw: &str, path: &Path, line_no: usize) -> ConfigResult<String> {
    let err = |message: String| ConfigError::EnvFile {
        path: path.to_path_buf(),
        line: line_no,
        message,
    };

    match raw.chars().next() {
        Some(quote @ ('\'' | '"')) => {
            let inner = &raw[1..];
            let close = inner
                .find(quote)
                .ok_or_else(|| err(format!("unterminated {quote}-quoted value")))?;
            let value = &inner[..close];
            let rest = inner[close + 1..].trim_start();
            if !(rest.is_empty() || rest.starts_with('#')) {
                return Err(err(format!(
                    "unexpected characters after closing quote: '{rest}'"
                )));
            }
            if quote == '\'' {
                Ok(value.to_string())
            } else {
                expand(value).map_err(err)
            }
        }
        _ => {
            let value = strip_inline_comment(raw).trim_end();
            expand(value).map_err(err)
        }
    }
}

/// Cut the value at a `#` preceded by whitespace.
fn strip_inline_comment(value: &str) -> &str {
    let bytes = value.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &value[..i];
        }
    }
    value
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
fn expand(value: &str) -> Result<String, String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err("unterminated ${} reference".to_string()),
                    }
                }
                out.push_str(&lookup(&name));
            }
            Some((_, c)) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some((_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(&lookup(&name));
            }
            _ => out.push('$'),
        }
    }

    Ok(out)
}

fn lookup(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}
