//! Hour durations: parsing free-text values and computing access expiry.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::error::JitError;

/// Shortest access window that may be requested.
pub const MIN_HOURS: u32 = 1;
/// Longest access window that may be requested.
pub const MAX_HOURS: u32 = 24;

/// Extract an integer from a free-text duration by dropping every non-digit.
///
/// `"PT5H"` gives 5. Values with no digits (or too many) give 0.
pub fn extract_hours(value: &str) -> u32 {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Check that `hours` is within the allowed window; `raw` is echoed in the error.
pub fn validate_hours(hours: u32, raw: &str) -> Result<u32, JitError> {
    if (MIN_HOURS..=MAX_HOURS).contains(&hours) {
        Ok(hours)
    } else {
        Err(JitError::InvalidDuration(raw.to_string()))
    }
}

/// Parse hours typed by the user at the prompt.
pub fn parse_hours_input(input: &str) -> Result<u32, JitError> {
    let trimmed = input.trim();
    let hours = trimmed
        .parse::<u32>()
        .map_err(|_| JitError::InvalidDuration(trimmed.to_string()))?;
    validate_hours(hours, trimmed)
}

/// Length in minutes of an ISO-8601 duration made of days, hours, minutes and seconds.
///
/// `P1D` is 1440 and `PT1H30M` is 90. Seconds round up to a whole minute.
/// Years, months, weeks and fractions are not accepted and give `None`.
pub fn iso8601_minutes(value: &str) -> Option<u64> {
    let rest = value.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let mut minutes: u64 = 0;
    let mut seconds: u64 = 0;
    let mut in_time = false;
    let mut number = String::new();

    for c in rest.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        if c == 'T' {
            if in_time || !number.is_empty() {
                return None;
            }
            in_time = true;
            continue;
        }

        let n: u64 = number.parse().ok()?;
        number.clear();
        let scaled = match (in_time, c) {
            (false, 'D') => n.checked_mul(24 * 60)?,
            (true, 'H') => n.checked_mul(60)?,
            (true, 'M') => n,
            (true, 'S') => {
                seconds = seconds.checked_add(n)?;
                0
            }
            _ => return None,
        };
        minutes = minutes.checked_add(scaled)?;
    }

    if !number.is_empty() || rest.ends_with('T') {
        return None;
    }
    minutes.checked_add(seconds.div_ceil(60))
}

/// Render hours as an ISO-8601 duration (`PT{h}H`).
pub fn to_iso8601(hours: u32) -> String {
    format!("PT{}H", hours)
}

/// End of an access window starting at `now`, as an ISO-8601 UTC timestamp.
pub fn expiry_after(now: DateTime<Utc>, hours: u32) -> String {
    (now + Duration::hours(i64::from(hours))).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// End of an access window starting now.
pub fn expiry_from_now(hours: u32) -> String {
    expiry_after(Utc::now(), hours)
}
