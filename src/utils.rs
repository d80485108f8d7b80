use std::str::FromStr;
use std::time::Duration;

/// Parses a duration string in the format "250ms", "30s", "10m", "5h", "3d".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let (value_str, unit) = if let Some(value) = s.strip_suffix("ms") {
        (value, "ms")
    } else {
        let split = s.len() - s.chars().last().map_or(0, char::len_utf8);
        (&s[..split], &s[split..])
    };

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        "d" => Ok(Duration::from_secs(value * 24 * 60 * 60)),
        _ => Err(format!(
            "Unknown duration unit: '{}'. Use 'ms', 's', 'm', 'h', or 'd'.",
            unit
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_milliseconds() {
        assert_eq!(
            parse_duration_string("250ms").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn parse_seconds() {
        assert_eq!(
            parse_duration_string("30s").unwrap(),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn parse_minutes() {
        assert_eq!(
            parse_duration_string("10m").unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn parse_hours() {
        assert_eq!(
            parse_duration_string("5h").unwrap(),
            Duration::from_secs(18000)
        );
    }

    #[test]
    fn parse_days() {
        assert_eq!(
            parse_duration_string("3d").unwrap(),
            Duration::from_secs(259200)
        );
    }

    #[test]
    fn trims_whitespace() {
        assert_eq!(
            parse_duration_string("  10m  ").unwrap(),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn empty_string_errors() {
        let err = parse_duration_string("   ").unwrap_err();
        assert!(err.contains("empty"), "error was: {}", err);
    }

    #[test]
    fn unknown_suffix_errors() {
        let err = parse_duration_string("10x").unwrap_err();
        assert!(err.contains("Unknown duration unit"), "error was: {}", err);
    }

    #[test]
    fn no_suffix_errors() {
        let err = parse_duration_string("10").unwrap_err();
        assert!(err.contains("Unknown duration unit"), "error was: {}", err);
    }

    #[test]
    fn no_number_errors() {
        let err = parse_duration_string("ms").unwrap_err();
        assert!(err.contains("Invalid numeric"), "error was: {}", err);
    }

    #[test]
    fn fractional_number_errors() {
        let err = parse_duration_string("5.5h").unwrap_err();
        assert!(err.contains("Invalid numeric"), "error was: {}", err);
    }

    #[test]
    fn negative_number_errors() {
        let err = parse_duration_string("-5m").unwrap_err();
        assert!(err.contains("Invalid numeric"), "error was: {}", err);
    }
}
