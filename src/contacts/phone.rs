//! Phone number normalization to E.164.

use std::sync::LazyLock;

use regex::Regex;

/// Characters people put in phone numbers that carry no meaning.
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-\.\(\)/]").unwrap());

static E164: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+[1-9]\d{7,14}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhoneError {
    #[error("empty phone number")]
    Empty,
    #[error("invalid phone number '{0}'")]
    Invalid(String),
}

/// Normalize a raw phone number to E.164.
///
/// National significant number length for calling codes with a fixed-length
/// plan, so bare national digits can be told apart from full numbers.
fn national_length(country: &str) -> Option<usize> {
    match country {
        "1" => Some(10),
        "33" | "61" => Some(9),
        "44" => Some(10),
        _ => None,
    }
}

/// `default_country` is a calling code without `+` (e.g. `"33"`) used for
/// national numbers written with a single leading `0`, or written bare
/// when their length matches that country's plan (`4155550100` for `"1"`).
pub fn normalize_phone(raw: &str, default_country: &str) -> Result<String, PhoneError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(PhoneError::Empty);
    }
    let compact = SEPARATORS.replace_all(trimmed, "");

    let candidate = if let Some(rest) = compact.strip_prefix('+') {
        format!("+{rest}")
    } else if let Some(rest) = compact.strip_prefix("00") {
        format!("+{rest}")
    } else if let Some(rest) = compact.strip_prefix('0') {
        format!("+{default_country}{rest}")
    } else if national_length(default_country) == Some(compact.len()) {
        format!("+{default_country}{compact}")
    } else if compact.len() >= 11 {
        format!("+{compact}")
    } else {
        return Err(PhoneError::Invalid(raw.to_string()));
    };

    if E164.is_match(&candidate) {
        Ok(candidate)
    } else {
        Err(PhoneError::Invalid(raw.to_string()))
    }
}
