//! Human-readable durations for command-line options.

use std::time::Duration;

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use tilt_relay::duration::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit, millis_per_unit): (&str, &str, u64) =
        if let Some(num) = src.strip_suffix("ms") {
            (num, "milliseconds", 1)
        } else if let Some(num) = src.strip_suffix('h') {
            (num, "hours", 3_600_000)
        } else if let Some(num) = src.strip_suffix('m') {
            (num, "minutes", 60_000)
        } else if let Some(num) = src.strip_suffix('s') {
            (num, "seconds", 1_000)
        } else {
            (src, "duration", 1_000)
        };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid {unit}: {num}"))?;
    value
        .checked_mul(millis_per_unit)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("{unit} out of range: {num}"))
}

/// Require a non-zero duration, for intervals that drive a timer.
pub fn parse_interval(src: &str) -> Result<Duration, String> {
    let interval = parse_duration(src)?;
    if interval.is_zero() {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(interval)
}
