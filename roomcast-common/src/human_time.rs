//! Human-readable time formatting for room announcements
//!
//! Provides consistent clock-style rendering across the bot's outbound
//! messages: `m:ss` for typical media, `h:mm:ss` once an hour is reached.

/// Format a duration in seconds as `m:ss`, or `h:mm:ss` for an hour or more.
///
/// # Examples
///
/// ```
/// use roomcast_common::human_time::format_clock;
///
/// assert_eq!(format_clock(0), "0:00");
/// assert_eq!(format_clock(330), "5:30");
/// assert_eq!(format_clock(3661), "1:01:01");
/// ```
pub fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{}:{:02}", mins, secs)
    }
}

/// Render a media duration for display: `LIVE` for live sources, `~` when
/// the duration is unknown (zero), otherwise clock format.
pub fn duration_label(duration_secs: u64, is_live: bool) -> String {
    if is_live {
        "LIVE".to_string()
    } else if duration_secs == 0 {
        "~".to_string()
    } else {
        format_clock(duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_under_an_hour() {
        assert_eq!(format_clock(0), "0:00");
        assert_eq!(format_clock(7), "0:07");
        assert_eq!(format_clock(60), "1:00");
        assert_eq!(format_clock(330), "5:30");
        assert_eq!(format_clock(3599), "59:59");
    }

    #[test]
    fn test_clock_with_hours() {
        assert_eq!(format_clock(3600), "1:00:00");
        assert_eq!(format_clock(3661), "1:01:01");
        assert_eq!(format_clock(86399), "23:59:59");
    }

    #[test]
    fn test_duration_label() {
        assert_eq!(duration_label(120, false), "2:00");
        assert_eq!(duration_label(0, false), "~");
        assert_eq!(duration_label(120, true), "LIVE");
        assert_eq!(duration_label(0, true), "LIVE");
    }
}
