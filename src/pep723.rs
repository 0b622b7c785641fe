//! # PEP 723 Script Metadata
//!
//! PEP 723 defines an inline, comment-delimited metadata block for
//! single-file Python scripts:
//!
//! ```text
//! # /// script
//! # requires-python = ">=3.11"
//! # dependencies = ["httpx"]
//! # ///
//! ```
//!
//! This module extracts and parses that block without executing anything.
//! Only `requires-python` and `dependencies` are surfaced; the raw TOML
//! payload is kept for the catalog.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const START_MARKER: &str = "# /// script";
const END_MARKER: &str = "# ///";

/// Parsed metadata from a `# /// script` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptMetadata {
    pub requires_python: Option<String>,
    pub dependencies: Vec<String>,
    /// The block's TOML payload with comment markers stripped.
    pub raw_toml: String,
}

/// Extract the TOML payload of the first `script` block, or None when the
/// source has no block at all.
pub fn extract_block(source: &str) -> std::result::Result<Option<String>, String> {
    let lines: Vec<&str> = source.lines().collect();
    let Some(start) = lines.iter().position(|l| l.trim() == START_MARKER) else {
        return Ok(None);
    };

    let mut payload = Vec::new();
    for line in &lines[start + 1..] {
        if line.trim() == END_MARKER {
            return Ok(Some(payload.join("\n")));
        }
        let trimmed = line.trim_start();
        let Some(content) = trimmed.strip_prefix('#') else {
            return Err("block lines must be comments starting with '#'".to_string());
        };
        payload.push(content.strip_prefix(' ').unwrap_or(content));
    }
    Err("start marker found but end marker '# ///' missing".to_string())
}

/// Parse the first `script` block of a Python source file.
///
/// Returns `Ok(None)` when there is no block; a malformed block is a *parse*
/// error carrying `path`.
pub fn parse_script(path: &Path, source: &str) -> Result<Option<ScriptMetadata>> {
    let block = extract_block(source).map_err(|message| Error::Pep723 {
        path: path.to_path_buf(),
        message,
    })?;
    let Some(raw_toml) = block else {
        return Ok(None);
    };

    let value: toml::Table = raw_toml.parse().map_err(|e: toml::de::Error| Error::Pep723 {
        path: path.to_path_buf(),
        message: e.message().to_string(),
    })?;

    let requires_python = match value.get("requires-python") {
        None => None,
        Some(v) => Some(
            v.as_str()
                .ok_or_else(|| Error::Pep723 {
                    path: path.to_path_buf(),
                    message: "requires-python must be a string".to_string(),
                })?
                .to_string(),
        ),
    };

    let dependencies = match value.get("dependencies") {
        None => Vec::new(),
        Some(v) => {
            let arr = v.as_array().ok_or_else(|| Error::Pep723 {
                path: path.to_path_buf(),
                message: "dependencies must be an array".to_string(),
            })?;
            let mut deps = Vec::with_capacity(arr.len());
            for item in arr {
                deps.push(
                    item.as_str()
                        .ok_or_else(|| Error::Pep723 {
                            path: path.to_path_buf(),
                            message: "dependencies must be an array of strings".to_string(),
                        })?
                        .to_string(),
                );
            }
            deps
        }
    };

    Ok(Some(ScriptMetadata {
        requires_python,
        dependencies,
        raw_toml,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#!/usr/bin/env python3
# /// script
# requires-python = ">=3.11"
# dependencies = [
#   "httpx",
#   "rich>=13",
# ]
# ///

import httpx
"#;

    fn parse(source: &str) -> Result<Option<ScriptMetadata>> {
        parse_script(Path::new("scripts/run.py"), source)
    }

    #[test]
    fn test_parse_full_block() {
        let meta = parse(SAMPLE).unwrap().unwrap();
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.11"));
        assert_eq!(meta.dependencies, vec!["httpx", "rich>=13"]);
        assert!(meta.raw_toml.contains("requires-python"));
    }

    #[test]
    fn test_no_block_is_none() {
        assert!(parse("import os\n").unwrap().is_none());
    }

    #[test]
    fn test_missing_end_marker_is_parse_error() {
        let src = "# /// script\n# requires-python = \">=3.11\"\nprint('x')\n";
        let err = parse(src).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Parse);
    }

    #[test]
    fn test_non_comment_line_inside_block_is_error() {
        let src = "# /// script\nrequires-python = \">=3.11\"\n# ///\n";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_block_without_fields() {
        let src = "# /// script\n# ///\n";
        let meta = parse(src).unwrap().unwrap();
        assert!(meta.requires_python.is_none());
        assert!(meta.dependencies.is_empty());
    }

    #[test]
    fn test_bad_dependencies_type_is_error() {
        let src = "# /// script\n# dependencies = \"httpx\"\n# ///\n";
        assert!(parse(src).is_err());
    }

    #[test]
    fn test_indented_block() {
        let src = "    # /// script\n    # requires-python = \">=3.12\"\n    # ///\n";
        let meta = parse(src).unwrap().unwrap();
        assert_eq!(meta.requires_python.as_deref(), Some(">=3.12"));
    }
}
