//! Shared utility functions used across the crate.

use std::time::Duration;

use crate::error::ConfigError;

/// Parse a duration string (e.g., "30s", "500ms", "1m", "1h") into std::time::Duration.
///
/// Supported formats:
/// - `Nms` - milliseconds (e.g., "500ms")
/// - `Ns` - seconds, fractional allowed (e.g., "30s", "0.01s")
/// - `Nm` - minutes (e.g., "5m")
/// - `Nh` - hours (e.g., "1h")
/// - Plain number - treated as milliseconds (e.g., "1000")
///
/// Returns `None` if the string cannot be parsed.
pub fn parse_duration_str(s: &str) -> Option<Duration> {
    let s = s.trim();
    let secs = |v: f64| (v.is_finite() && v >= 0.0).then(|| Duration::from_secs_f64(v));
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(v) = s.strip_suffix('s') {
        v.trim().parse::<f64>().ok().and_then(secs)
    } else if let Some(v) = s.strip_suffix('m') {
        v.trim().parse::<f64>().ok().and_then(|m| secs(m * 60.0))
    } else if let Some(v) = s.strip_suffix('h') {
        v.trim().parse::<f64>().ok().and_then(|h| secs(h * 3600.0))
    } else {
        s.parse::<u64>().ok().map(Duration::from_millis)
    }
}

/// Parse a duration for a named configuration field.
///
/// Unlike [`parse_duration_str`], an unparseable value is a configuration error
/// rather than a silent fallback.
pub fn parse_duration_field(field: &str, s: &str) -> Result<Duration, ConfigError> {
    parse_duration_str(s).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_string(),
        value: s.to_string(),
    })
}

/// Fractional milliseconds, the unit latency thresholds are written in.
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_milliseconds() {
        assert_eq!(
            parse_duration_str("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            parse_duration_str("1000ms"),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_duration_str("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_str("1s"), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_parse_minutes_and_hours() {
        assert_eq!(parse_duration_str("10m"), Some(Duration::from_secs(600)));
        assert_eq!(parse_duration_str("1h"), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_parse_plain_number() {
        assert_eq!(
            parse_duration_str("1000"),
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn test_parse_with_whitespace() {
        assert_eq!(parse_duration_str(" 30s "), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_fractional_seconds() {
        assert_eq!(parse_duration_str("0.01s"), Some(Duration::from_millis(10)));
        assert_eq!(
            parse_duration_str("1.5s"),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(parse_duration_str("invalid"), None);
        assert_eq!(parse_duration_str("abc123"), None);
        assert_eq!(parse_duration_str("-1s"), None);
    }

    #[test]
    fn test_parse_duration_field_reports_field() {
        let err = parse_duration_field("duration", "ten seconds").unwrap_err();
        assert!(err.to_string().contains("duration"));
        assert!(err.to_string().contains("ten seconds"));
    }
}
