//! JSON intelligence: best-effort structured-log extraction for one raw log
//! line (SPEC_FULL §4.6).

use termcolor::Color;

/// A normalized log level, one of the four buckets the renderer colors
/// distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
    Debug,
}

impl Level {
    pub fn tag(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Debug => "DEBUG",
        }
    }

    pub fn color(self) -> Color {
        match self {
            Level::Info => Color::Green,
            Level::Warn => Color::Yellow,
            Level::Error => Color::Red,
            Level::Debug => Color::Ansi256(8), // dim gray
        }
    }

    fn normalize(raw: &str) -> Option<Level> {
        match raw.to_ascii_uppercase().as_str() {
            "INFO" | "INF" => Some(Level::Info),
            "WARN" | "WARNING" => Some(Level::Warn),
            "ERROR" | "ERR" | "FATAL" | "CRIT" => Some(Level::Error),
            "DEBUG" | "DBG" => Some(Level::Debug),
            _ => None,
        }
    }
}

/// The result of successfully parsing one line as a JSON object.
#[derive(Debug, Clone)]
pub struct ParsedLine {
    pub level: Option<Level>,
    pub message: String,
    /// Remaining fields, in source order, excluding whichever level/message
    /// keys were consumed.
    pub extra: Vec<(String, String)>,
}

const LEVEL_KEYS: [&str; 3] = ["level", "severity", "lvl"];
const MESSAGE_KEYS: [&str; 2] = ["msg", "message"];

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Attempts JSON-object parsing of `line`. Returns `None` when the trimmed
/// text doesn't start with `{` or doesn't parse as a JSON object, in which
/// case the caller falls back to rendering the raw line.
pub fn parse(line: &str) -> Option<ParsedLine> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
    let obj = value.as_object()?;

    let level = LEVEL_KEYS
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
        .and_then(Level::normalize);

    let message_key = MESSAGE_KEYS.iter().find(|key| obj.contains_key(**key));
    let message = match message_key.and_then(|key| obj.get(*key)) {
        Some(value) => scalar_to_string(value),
        None => trimmed.to_string(),
    };

    let excluded: std::collections::HashSet<&str> = LEVEL_KEYS
        .iter()
        .chain(MESSAGE_KEYS.iter())
        .copied()
        .collect();
    let extra = obj
        .iter()
        .filter(|(key, _)| !excluded.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), scalar_to_string(value)))
        .collect();

    Some(ParsedLine { level, message, extra })
}
