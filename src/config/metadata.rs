//! Inline script-metadata parser.
//!
//! Scripts may embed their own dependency manifest in a comment block:
//!
//! ```text
//! # /// script
//! # dependencies = ["requests"]
//! # requires-python = ">=3.10"
//! # ///
//! ```
//!
//! The block body is TOML. Only the first block is honored; a script without
//! one yields an empty manifest.

use super::error::{ConfigError, ConfigResult};
use serde::Deserialize;
use std::path::Path;

const BLOCK_OPEN: &str = "# /// script";
const BLOCK_CLOSE: &str = "# ///";

/// The dependency manifest embedded in a script.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptMetadata {
    /// Package specifiers required by the script.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Python version specifier, e.g. ">=3.10".
    #[serde(rename = "requires-python")]
    pub requires_python: Option<String>,
}

impl ScriptMetadata {
    /// True if the script declared nothing.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.requires_python.is_none()
    }
}

/// Extract and parse the first metadata block from script source.
///
/// `path` is used for error reporting only.
pub fn parse_inline_metadata(source: &str, path: &Path) -> ConfigResult<ScriptMetadata> {
    let lines: Vec<&str> = source.lines().collect();

    let Some(open_idx) = lines.iter().position(|l| l.trim_end() == BLOCK_OPEN) else {
        return Ok(ScriptMetadata::default());
    };

    let err = |line: usize, message: String| ConfigError::Metadata {
        path: path.to_path_buf(),
        line,
        message,
    };

    let mut body = String::new();
    let mut close_idx = None;
    for (offset, line) in lines[open_idx + 1..].iter().enumerate() {
        let line_no = open_idx + 2 + offset;
        let trimmed = line.trim_end();
        if trimmed == BLOCK_CLOSE {
            close_idx = Some(line_no);
            break;
        }
        let content = if trimmed == "#" {
            ""
        } else if let Some(rest) = trimmed.strip_prefix("# ") {
            rest
        } else {
            return Err(err(
                line_no,
                "metadata block lines must start with '# '".to_string(),
            ));
        };
        body.push_str(content);
        body.push('\n');
    }

    if close_idx.is_none() {
        return Err(err(
            open_idx + 1,
            "unterminated metadata block (missing '# ///')".to_string(),
        ));
    }

    toml::from_str::<ScriptMetadata>(&body).map_err(|e| {
        // Map the TOML error's byte offset back to a line in the script.
        let line_in_body = e
            .span()
            .map(|span| body[..span.start.min(body.len())].matches('\n').count())
            .unwrap_or(0);
        err(open_idx + 2 + line_in_body, e.message().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn parse(source: &str) -> ConfigResult<ScriptMetadata> {
        parse_inline_metadata(source, &PathBuf::from("script.py"))
    }

    #[test]
    fn script_without_block_yields_empty_manifest() {
        let meta = parse("import sys\nprint(sys.argv)\n").unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn parses_dependencies_and_requires_python() {
        let meta = parse(
            "# /// script\n\
             # dependencies = [\"requests\", \"rich>=13\"]\n\
             # requires-python = \">=3.10\"\n\
             # ///\n\
             import requests\n",
        )
        .unwrap();
        assert_eq!(meta.dependencies, vec!["requests", "rich>=13"]);
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.10"));
    }

    #[test]
    fn bare_hash_lines_are_blank() {
        let meta = parse(
            "# /// script\n\
             #\n\
             # dependencies = [\"httpx\"]\n\
             # ///\n",
        )
        .unwrap();
        assert_eq!(meta.dependencies, vec!["httpx"]);
    }

    #[test]
    fn block_after_code_is_still_found() {
        let meta = parse(
            "#!/usr/bin/env python\n\
             \"\"\"docstring\"\"\"\n\
             # /// script\n\
             # dependencies = [\"attrs\"]\n\
             # ///\n",
        )
        .unwrap();
        assert_eq!(meta.dependencies, vec!["attrs"]);
    }

    #[test]
    fn unterminated_block_reports_opening_line() {
        let err = parse("x = 1\n# /// script\n# dependencies = []\n").unwrap_err();
        match err {
            ConfigError::Metadata { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Metadata error, got {other:?}"),
        }
    }

    #[test]
    fn uncommented_interior_line_is_rejected() {
        let err = parse(
            "# /// script\n\
             dependencies = []\n\
             # ///\n",
        )
        .unwrap_err();
        match err {
            ConfigError::Metadata { line, .. } => assert_eq!(line, 2),
            other => panic!("expected Metadata error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_toml_reports_line_inside_block() {
        let err = parse(
            "# /// script\n\
             # dependencies = [\n\
             # ///\n",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Metadata { .. }));
    }

    #[test]
    fn unrecognized_keys_are_ignored() {
        let meta = parse(
            "# /// script\n\
             # dependencies = [\"requests\"]\n\
             # [tool.custom]\n\
             # option = true\n\
             # ///\n",
        )
        .unwrap();
        assert_eq!(meta.dependencies, vec!["requests"]);
    }
}
