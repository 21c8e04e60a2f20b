//! Partition a lookback period into `created:` qualifiers for the search
//! API, which caps any single query at 1,000 results.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static TIME_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)?\s*([A-Za-z]+)\s*$").unwrap());

#[derive(Debug, Error, PartialEq)]
pub enum TimeSliceError {
    #[error("unknown time annotation: \"{0}\"")]
    UnknownAnnotation(String),
    #[error("slice window \"{0}\" has zero length")]
    EmptyWindow(String),
}

/// Convert a time annotation like `"3d"`, `"2 weeks"` or `"m"` to seconds.
pub fn to_second(annotation: &str) -> Result<u64, TimeSliceError> {
    let unknown = || TimeSliceError::UnknownAnnotation(annotation.to_owned());
    let captures = TIME_ANNOTATION.captures(annotation).ok_or_else(unknown)?;
    let amount: u64 = match captures.get(1) {
        Some(digits) => digits.as_str().parse().map_err(|_| unknown())?,
        None => 1,
    };
    let factor = match captures[2].to_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hrs" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "mo" | "month" | "months" => 2_592_000,
        "y" | "yr" | "year" | "years" => 31_536_000,
        _ => return Err(unknown()),
    };
    Ok(amount * factor)
}

/// Slice `[now - period, now]` into windows of `window` length, formatted as
/// search date qualifiers. Every slice but the last is `start..end`; the
/// final, possibly truncated one is `>start`.
pub fn slice_period(
    period: &str,
    window: &str,
    newest_first: bool,
) -> Result<VecDeque<String>, TimeSliceError> {
    slice_period_at(Utc::now(), period, window, newest_first)
}

fn slice_period_at(
    now: DateTime<Utc>,
    period: &str,
    window: &str,
    newest_first: bool,
) -> Result<VecDeque<String>, TimeSliceError> {
    let window_seconds = to_second(window)?;
    if window_seconds == 0 {
        return Err(TimeSliceError::EmptyWindow(window.to_owned()));
    }
    let period = Duration::seconds(to_second(period)? as i64);
    let window = Duration::seconds(window_seconds as i64);

    let current = now.trunc_subsecs(0);
    let mut cursor = current - period;
    let mut slices = Vec::new();
    loop {
        let stop = cursor + window;
        if stop >= current {
            slices.push(format!(">{}", format_instant(cursor)));
            break;
        }
        slices.push(format!("{}..{}", format_instant(cursor), format_instant(stop)));
        cursor = stop;
    }
    if newest_first {
        slices.reverse();
    }
    Ok(slices.into())
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn annotations_convert_to_seconds() {
        assert_eq!(to_second("2h"), Ok(7_200));
        assert_eq!(to_second("m"), Ok(60));
        assert_eq!(to_second("3d"), Ok(259_200));
        assert_eq!(to_second(" 2 weeks "), Ok(1_209_600));
        assert_eq!(to_second("10s"), Ok(10));
        assert_eq!(to_second("1mo"), Ok(2_592_000));
        assert_eq!(to_second("y"), Ok(31_536_000));
    }

    #[test]
    fn unknown_annotations_are_rejected() {
        for bad in ["2 lightyears", "parsecs", "", "5", "h2"] {
            assert!(to_second(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn slices_partition_the_period() {
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap();
        let slices = slice_period_at(now, "2d", "1d", false).unwrap();
        assert_eq!(
            Vec::from(slices),
            vec![
                "2024-01-01T00:00:00+00:00..2024-01-02T00:00:00+00:00".to_owned(),
                ">2024-01-02T00:00:00+00:00".to_owned(),
            ]
        );
    }

    #[test]
    fn newest_first_reverses_the_queue() {
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap();
        let oldest = slice_period_at(now, "3d", "1d", false).unwrap();
        let mut newest = Vec::from(slice_period_at(now, "3d", "1d", true).unwrap());
        newest.reverse();
        assert_eq!(Vec::from(oldest), newest);
    }

    #[test]
    fn slices_cover_without_gaps_or_overlap() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 45).unwrap();
        let slices = slice_period_at(now, "1w", "2d", false).unwrap();
        let mut previous_end: Option<String> = None;
        for (i, slice) in slices.iter().enumerate() {
            if let Some((start, end)) = slice.split_once("..") {
                if let Some(previous) = &previous_end {
                    assert_eq!(start, previous, "gap before slice {i}");
                }
                previous_end = Some(end.to_owned());
            } else {
                assert!(slice.starts_with('>'), "last slice is open-ended");
                assert_eq!(i, slices.len() - 1);
                assert_eq!(Some(&slice[1..]), previous_end.as_deref());
            }
        }
    }

    #[test]
    fn truncated_tail_collapses_to_a_single_open_slice() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let slices = slice_period_at(now, "1d", "1w", false).unwrap();
        assert_eq!(Vec::from(slices), vec![">2024-01-01T00:00:00+00:00".to_owned()]);
    }

    #[test]
    fn zero_width_windows_are_rejected() {
        assert_eq!(
            slice_period("1d", "0s", false),
            Err(TimeSliceError::EmptyWindow("0s".to_owned()))
        );
    }
}
