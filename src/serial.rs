//! SOA serial generation: `<today><nn>`, incrementing within a day and
//! wrapping 99 -> 01.

use chrono::NaiveDate;

fn today_prefix(today: NaiveDate) -> String {
    today.format("%Y%m%d").to_string()
}

/// Generates the next serial given today's date and the zone's previous
/// serial (if any, and if it parsed).
///
/// - No prior serial: `<today>01`.
/// - Prior serial from today: `<today><nn+1>`, wrapping to `01` past 99.
/// - Prior serial from a different day (or unparseable): `<today>01`.
pub fn next_serial(today: NaiveDate, previous: Option<&str>) -> String {
    let prefix = today_prefix(today);

    let previous_today_counter = previous.and_then(|serial| {
        if serial.len() != 10 || !serial.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let (date_part, counter_part) = serial.split_at(8);
        if date_part != prefix {
            return None;
        }
        counter_part.parse::<u32>().ok()
    });

    let counter = match previous_today_counter {
        Some(n) if n < 99 => n + 1,
        _ => 1,
    };

    format!("{prefix}{counter:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_no_prior_serial() {
        assert_eq!(next_serial(date(2026, 7, 31), None), "2026073101");
    }

    #[test]
    fn test_same_day_increment() {
        assert_eq!(
            next_serial(date(2026, 7, 31), Some("2026073105")),
            "2026073106"
        );
    }

    #[test]
    fn test_same_day_wrap() {
        assert_eq!(
            next_serial(date(2026, 7, 31), Some("2026073199")),
            "2026073101"
        );
    }

    #[test]
    fn test_different_day_resets() {
        assert_eq!(
            next_serial(date(2026, 7, 31), Some("2026073005")),
            "2026073101"
        );
    }

    #[test]
    fn test_unparseable_prior_treated_as_none() {
        assert_eq!(next_serial(date(2026, 7, 31), Some("garbage")), "2026073101");
    }
}
