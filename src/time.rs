//! Calendar helpers shared by timelines and stacks
use hifitime::{Duration, Epoch, Unit};

use crate::constants::{OPEN_END_YEAR, SECONDS_PER_DAY};

/// Sentinel [Epoch] standing for "still valid" in interval comparisons.
/// Never serialized: open ended records carry `None`.
pub fn open_end() -> Epoch {
    Epoch::from_gregorian_utc(OPEN_END_YEAR, 12, 31, 23, 59, 59, 0)
}

/// Truncates this [Epoch] to the whole UTC second.
/// Station information boundaries have a 1 second granularity.
pub fn truncate_to_second(t: Epoch) -> Epoch {
    let (y, m, d, hh, mm, ss, _) = t.to_gregorian_utc();
    Epoch::from_gregorian_utc(y, m, d, hh, mm, ss, 0)
}

/// Midnight (UTC) of the day this [Epoch] belongs to
pub fn midnight(t: Epoch) -> Epoch {
    let (y, m, d, _, _, _, _) = t.to_gregorian_utc();
    Epoch::from_gregorian_utc_at_midnight(y, m, d)
}

/// One second [Duration]
pub fn one_second() -> Duration {
    Duration::from_seconds(1.0)
}

/// Returns (year, day of year), day of year starting at 1.
pub fn year_doy(t: Epoch) -> (i32, u16) {
    let (y, _, _, _, _, _, _) = t.to_gregorian_utc();
    let jan1 = Epoch::from_gregorian_utc_at_midnight(y, 1, 1);
    let days = ((midnight(t) - jan1).to_seconds() / SECONDS_PER_DAY).round() as u16;
    (y, days + 1)
}

/// Converts a (year, doy) pair to the corresponding midnight [Epoch]
pub fn from_year_doy(year: i32, doy: u16) -> Epoch {
    let jan1 = Epoch::from_gregorian_utc_at_midnight(year, 1, 1);
    jan1 + (doy.saturating_sub(1) as i64) * Unit::Day
}

/// Fractional year (Fyear): year + fraction of the year elapsed.
pub fn fyear(t: Epoch) -> f64 {
    let (y, _, _, _, _, _, _) = t.to_gregorian_utc();
    let start = Epoch::from_gregorian_utc_at_midnight(y, 1, 1);
    let end = Epoch::from_gregorian_utc_at_midnight(y + 1, 1, 1);
    y as f64 + (t - start).to_seconds() / (end - start).to_seconds()
}

/// Elapsed time between two [Epoch]s, in seconds
pub fn seconds_between(start: Epoch, end: Epoch) -> f64 {
    (end - start).to_seconds()
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn second_truncation() {
        let t = Epoch::from_gregorian_utc(2020, 1, 1, 12, 30, 15, 750_000_000);
        assert_eq!(
            truncate_to_second(t),
            Epoch::from_gregorian_utc_hms(2020, 1, 1, 12, 30, 15)
        );
    }

    #[test]
    fn day_of_year() {
        let t = Epoch::from_str("2020-12-31T18:00:00 UTC").unwrap();
        assert_eq!(year_doy(t), (2020, 366));
        assert_eq!(from_year_doy(2020, 366), midnight(t));

        let t = Epoch::from_gregorian_utc_at_midnight(2021, 1, 1);
        assert_eq!(year_doy(t), (2021, 1));
    }

    #[test]
    fn fractional_year() {
        let t = Epoch::from_gregorian_utc_at_midnight(2021, 1, 1);
        assert!((fyear(t) - 2021.0).abs() < 1E-9);
        let t = Epoch::from_gregorian_utc_hms(2021, 7, 2, 12, 0, 0);
        assert!((fyear(t) - 2021.5).abs() < 1E-3);
    }

    #[test]
    fn sentinel_is_far_future() {
        let t = Epoch::from_gregorian_utc_at_midnight(2100, 1, 1);
        assert!(open_end() > t);
    }
}
