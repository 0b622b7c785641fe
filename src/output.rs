//! # Output Configuration
//!
//! Controls how commands talk to the terminal: color/emoji support based on
//! user preference and terminal capabilities, and the `--json` rendering of
//! results and errors.
//!
//! Color handling respects `--color=never|always|auto`, `NO_COLOR`
//! (https://no-color.org/), `CLICOLOR=0`, `CLICOLOR_FORCE=1`, and
//! `TERM=dumb`.

use std::env;

use crate::error::Error;

/// Output configuration derived once from flags and environment.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
    /// Machine-readable JSON instead of human text.
    pub json: bool,
}

impl OutputConfig {
    pub fn from_env_and_flags(color_flag: &str, json: bool) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color, json }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    /// True when prompting the user makes sense: a TTY and not `--json`.
    pub fn interactive(&self) -> bool {
        !self.json && console::user_attended()
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self {
            use_color: false,
            json: false,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flags("auto", false)
    }
}

/// Emoji when colors are on, plain marker otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

/// Render an error to stderr in the configured format and return its exit
/// code.
pub fn report_error(config: &OutputConfig, err: &Error) -> i32 {
    let kind = err.kind();
    if config.json {
        let mut obj = serde_json::json!({
            "ok": false,
            "kind": kind.as_str(),
            "reason": err.to_string(),
        });
        if let Some(object) = err.object() {
            obj["object"] = serde_json::json!(object);
        }
        if let Some(hint) = err.hint() {
            obj["hint"] = serde_json::json!(hint);
        }
        eprintln!("{obj}");
    } else {
        eprintln!("error: {err}");
        if let Some(hint) = err.hint() {
            eprintln!("hint: {hint}");
        }
    }
    kind.exit_code()
}

/// Print a success payload under `--json`, or nothing (the command already
/// printed its human output).
pub fn report_json_ok(config: &OutputConfig, payload: serde_json::Value) {
    if config.json {
        let mut obj = serde_json::json!({"ok": true});
        if let Some(map) = payload.as_object() {
            for (k, v) in map {
                obj[k] = v.clone();
            }
        }
        println!("{obj}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_always() {
        let config = OutputConfig::from_env_and_flags("always", false);
        assert!(config.use_color);
    }

    #[test]
    fn test_color_never() {
        let config = OutputConfig::from_env_and_flags("never", true);
        assert!(!config.use_color);
        assert!(config.json);
        assert!(!config.interactive());
    }

    #[test]
    fn test_emoji_helper() {
        let with = OutputConfig {
            use_color: true,
            json: false,
        };
        let without = OutputConfig::plain();
        assert_eq!(emoji(&with, "🔍", "[scan]"), "🔍");
        assert_eq!(emoji(&without, "🔍", "[scan]"), "[scan]");
    }

    #[test]
    fn test_report_error_exit_code() {
        let config = OutputConfig::plain();
        let err = Error::TrustBlocked {
            key: "x@1.0.0".to_string(),
            reason: "exec not trusted".to_string(),
        };
        assert_eq!(report_error(&config, &err), 6);
    }
}
