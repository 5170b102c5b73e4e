//! Retention evaluation for date-named artifacts.
//!
//! Pure decision functions: whether a name follows the `YYYY-MM-DD` naming
//! convention, whether an artifact is old enough to delete, and which artifact
//! the scheduled single-file compression targets. All arithmetic is done on
//! calendar days, so callers must feed a consistent calendar (the service uses
//! the local date everywhere).

use chrono::{Datelike, Days, NaiveDate};

/// Suffix appended to an artifact name to form its archive name.
pub const ARCHIVE_SUFFIX: &str = ".zip";

const SEPARATORS: [u8; 3] = [b'-', b'/', b'.'];

/// Returns true iff `name` is exactly a date of the form `(19|20)YY<sep>MM<sep>DD`.
///
/// The separator is one of `-`, `/` or `.` and must be the same in both
/// positions. Months run 01-12 and days 01-31; no calendar validation is done,
/// so `2021-02-30` matches. Anything trailing (such as the archive suffix)
/// makes the name a non-match.
pub fn matches_date_pattern(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.len() != 10 {
        return false;
    }

    let separator = bytes[4];
    if !SEPARATORS.contains(&separator) || bytes[7] != separator {
        return false;
    }

    let digits = [0, 1, 2, 3, 5, 6, 8, 9];
    if !digits.iter().all(|&i| bytes[i].is_ascii_digit()) {
        return false;
    }

    let century = &bytes[0..2];
    if century != b"19" && century != b"20" {
        return false;
    }

    let month = two_digits(bytes[5], bytes[6]);
    let day = two_digits(bytes[8], bytes[9]);

    (1..=12).contains(&month) && (1..=31).contains(&day)
}

fn two_digits(tens: u8, ones: u8) -> u32 {
    u32::from(tens - b'0') * 10 + u32::from(ones - b'0')
}

/// Parse an artifact name into a calendar date.
///
/// Accepts the same separators as [`matches_date_pattern`] but, unlike it,
/// rejects dates that do not exist on the calendar.
pub fn parse_artifact_date(name: &str) -> Option<NaiveDate> {
    if !matches_date_pattern(name) {
        return None;
    }

    let bytes = name.as_bytes();
    let year = name.get(0..4)?.parse::<i32>().ok()?;
    let month = two_digits(bytes[5], bytes[6]);
    let day = two_digits(bytes[8], bytes[9]);

    NaiveDate::from_ymd_opt(year, month, day)
}

/// Whether the raw artifact `name` has aged past the retention offset.
///
/// True iff `today - offset_days` is strictly after the artifact's date. An
/// offset of zero disables deletion, and names that do not parse as a calendar
/// date are never eligible.
pub fn is_eligible_for_deletion(name: &str, offset_days: u32, today: NaiveDate) -> bool {
    if offset_days == 0 {
        return false;
    }

    let Some(artifact_date) = parse_artifact_date(name) else {
        return false;
    };

    match today.checked_sub_days(Days::new(u64::from(offset_days))) {
        Some(removal_date) => removal_date > artifact_date,
        None => false,
    }
}

/// The artifact name for the day before `today`, formatted `YYYY-MM-DD`.
pub fn previous_day(today: NaiveDate) -> String {
    let yesterday = today.pred_opt().unwrap_or(today);
    format_artifact_name(yesterday)
}

/// Canonical `YYYY-MM-DD` name for a date.
pub fn format_artifact_name(date: NaiveDate) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        date.month(),
        date.day()
    )
}

/// Archive name for an artifact.
pub fn archive_name(name: &str) -> String {
    format!("{name}{ARCHIVE_SUFFIX}")
}
