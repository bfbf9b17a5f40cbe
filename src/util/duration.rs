use crate::error::ConfigError;

/// Default `since_seconds` used when `--since` is not passed (SPEC_FULL §6).
pub const DEFAULT_SINCE_SECONDS: i64 = 600;

/// Parses a `<integer><unit>` duration string (`10s`, `5m`, `1h`, `2d`) into
/// seconds. Any other shape is a `ConfigError::InvalidDuration`.
pub fn parse_duration(raw: &str) -> Result<i64, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let unit = raw.chars().last().unwrap();
    let multiplier: i64 = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86_400,
        _ => return Err(ConfigError::InvalidDuration(raw.to_string())),
    };

    let digits = &raw[..raw.len() - 1];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::InvalidDuration(raw.to_string()));
    }

    let value: i64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(raw.to_string()))?;
    Ok(value * multiplier)
}
