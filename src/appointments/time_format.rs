//! The single boundary between 12-hour display time and 24-hour storage time.
//!
//! Storage is always a `TIME` column (`10:00:00`); everything shown to people
//! is `10:00 AM`. Input accepts either form.

use chrono::NaiveTime;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a valid time; use e.g. 10:00 AM or 14:30")]
pub struct TimeFormatError(pub String);

/// Parses `10:00 AM`, `9:30pm`, `9 AM`, `14:30` or `14:30:00`.
pub fn parse_time(input: &str) -> Result<NaiveTime, TimeFormatError> {
    let raw = input.trim();
    let invalid = || TimeFormatError(input.to_string());
    if raw.is_empty() {
        return Err(invalid());
    }

    let upper = raw.to_ascii_uppercase();
    let meridiem = if upper.ends_with("AM") {
        Some(false)
    } else if upper.ends_with("PM") {
        Some(true)
    } else {
        None
    };

    match meridiem {
        Some(is_pm) => {
            let clock = upper[..upper.len() - 2].trim();
            let mut parts = clock.split(':');
            let hour: u32 = parts
                .next()
                .and_then(|h| h.trim().parse().ok())
                .ok_or_else(invalid)?;
            let minute: u32 = match parts.next() {
                Some(m) => m.trim().parse().map_err(|_| invalid())?,
                None => 0,
            };
            let second: u32 = match parts.next() {
                Some(s) => s.trim().parse().map_err(|_| invalid())?,
                None => 0,
            };
            if parts.next().is_some() || !(1..=12).contains(&hour) {
                return Err(invalid());
            }
            let hour = match (hour, is_pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            };
            NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(invalid)
        }
        None => NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|_| invalid()),
    }
}

/// `10:00 AM`
pub fn to_display(time: NaiveTime) -> String {
    time.format("%-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn twelve_hour_input_is_stored_as_24_hour() {
        let time = parse_time("10:00 AM").unwrap();
        assert_eq!(time, hms(10, 0, 0));
        assert_eq!(parse_time("2:45 pm").unwrap(), hms(14, 45, 0));
        assert_eq!(parse_time("9AM").unwrap(), hms(9, 0, 0));
    }

    #[test]
    fn midnight_and_noon_edges() {
        assert_eq!(parse_time("12:00 AM").unwrap(), hms(0, 0, 0));
        assert_eq!(parse_time("12:15 PM").unwrap(), hms(12, 15, 0));
        assert_eq!(to_display(hms(0, 5, 0)), "12:05 AM");
        assert_eq!(to_display(hms(12, 0, 0)), "12:00 PM");
    }

    #[test]
    fn accepts_storage_form() {
        assert_eq!(parse_time("14:30").unwrap(), hms(14, 30, 0));
        assert_eq!(parse_time("08:05:09").unwrap(), hms(8, 5, 9));
    }

    #[test]
    fn display_drops_leading_zero() {
        assert_eq!(to_display(hms(9, 30, 0)), "9:30 AM");
        assert_eq!(to_display(hms(17, 0, 0)), "5:00 PM");
    }

    #[test]
    fn rejects_garbage() {
        for input in ["", "13:00 PM", "0:30 AM", "25:00", "10:61 AM", "noon", "1:2:3:4 PM"] {
            assert!(parse_time(input).is_err(), "accepted {input:?}");
        }
    }
}
