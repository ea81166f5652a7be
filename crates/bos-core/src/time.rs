//! Timestamp and duration helpers.
//!
//! Timestamps are always `DateTime<Utc>` and serialize as RFC3339.
//! Durations in the options record use short-hand strings such as `"7d"`
//! or `"4h30m"`; age filters on the sessions list endpoint use the same
//! grammar.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

/// Errors from parsing a duration or age string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    /// The string contained no recognizable `<number><unit>` groups.
    #[error("unparsable duration: {0:?}")]
    Unparsable(String),
    /// A numeric group overflowed.
    #[error("duration out of range: {0:?}")]
    OutOfRange(String),
}

/// The current wall-clock time.
///
/// Call sites take the time once and thread it through; nothing in the
/// workspace memoizes "now".
#[must_use]
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a short-hand duration such as `"7d"`, `"4h"`, `"90m"`, `"30s"`
/// or a combination (`"1d12h"`). A bare `"0"` parses as zero.
///
/// # Errors
///
/// Returns an error when no `<number><unit>` group can be extracted or a
/// value overflows.
pub fn parse_duration(s: &str) -> Result<Duration, DurationError> {
    let trimmed = s.trim();
    if trimmed == "0" {
        return Ok(Duration::zero());
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    let mut matched = false;
    for c in trimmed.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(DurationError::Unparsable(s.to_string()));
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| DurationError::OutOfRange(s.to_string()))?;
        let unit = match c.to_ascii_lowercase() {
            'w' => Duration::weeks(1),
            'd' => Duration::days(1),
            'h' => Duration::hours(1),
            'm' => Duration::minutes(1),
            's' => Duration::seconds(1),
            _ => return Err(DurationError::Unparsable(s.to_string())),
        };
        total += unit * i32::try_from(value).map_err(|_| DurationError::OutOfRange(s.to_string()))?;
        digits.clear();
        matched = true;
    }
    if !digits.is_empty() || !matched {
        return Err(DurationError::Unparsable(s.to_string()));
    }
    Ok(total)
}

/// Convert an age string into the timestamp that far in the past.
///
/// Used by the sessions list `min_age`/`max_age` filters.
///
/// # Errors
///
/// Propagates [`parse_duration`] errors.
pub fn parse_age(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, DurationError> {
    Ok(now - parse_duration(s)?)
}
