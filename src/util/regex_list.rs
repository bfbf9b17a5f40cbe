use regex::RegexBuilder;

use crate::error::ConfigError;

/// Characters whose presence in a namespace token marks it as a regex
/// pattern rather than an exact name (SPEC_FULL §4.1).
const REGEX_META: &[char] = &['.', '*', '+', '?', '^', '$', '{', '}', '(', ')', '|', '[', ']', '\\'];

pub fn is_regex_pattern(token: &str) -> bool {
    token.chars().any(|c| REGEX_META.contains(&c))
}

/// Compiles a comma-separated list into an ordered sequence of
/// case-insensitive regexes. An empty string compiles to an empty list,
/// which is the "no include filter" / "no exclude filter" identity.
pub fn compile_regex_list(raw: &str) -> Result<Vec<regex::Regex>, ConfigError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Vec::new());
    }
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|err| ConfigError::InvalidPattern(pattern.to_string(), err))
        })
        .collect()
}

/// Include semantics: admitted iff the list is empty or any pattern
/// `search`-matches (substring, not anchored `match`).
pub fn matches_any(patterns: &[regex::Regex], candidate: &str) -> bool {
    patterns.is_empty() || patterns.iter().any(|p| p.is_match(candidate))
}

/// Applies include/exclude semantics together: exclude wins over include.
pub fn admitted(include: &[regex::Regex], exclude: &[regex::Regex], candidate: &str) -> bool {
    if exclude.iter().any(|p| p.is_match(candidate)) {
        return false;
    }
    matches_any(include, candidate)
}
