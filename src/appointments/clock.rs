use anyhow::{Result, anyhow};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};

/// One instant, seen both as a UTC timestamp and as the shop's wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Moment {
    pub at: DateTime<Utc>,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

/// Resolves "today" and "now" in the shop's local time zone.
#[derive(Debug, Clone, Copy)]
pub struct BusinessClock {
    offset: FixedOffset,
}

impl BusinessClock {
    pub fn from_offset_minutes(minutes: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| anyhow!("{} minutes is not a valid UTC offset", minutes))?;
        Ok(Self { offset })
    }

    pub fn now(&self) -> Moment {
        self.moment_at(Utc::now())
    }

    pub fn today(&self) -> NaiveDate {
        self.now().date
    }

    pub fn moment_at(&self, at: DateTime<Utc>) -> Moment {
        let local = at.with_timezone(&self.offset);
        let time = local.time();
        Moment {
            at,
            date: local.date_naive(),
            time: time.with_nanosecond(0).unwrap_or(time),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn local_date_rolls_over_before_utc() {
        let clock = BusinessClock::from_offset_minutes(8 * 60).unwrap();
        let at = Utc.with_ymd_and_hms(2026, 10, 14, 17, 30, 0).unwrap();
        let moment = clock.moment_at(at);
        assert_eq!(moment.date, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert_eq!(moment.time, NaiveTime::from_hms_opt(1, 30, 0).unwrap());
    }

    #[test]
    fn rejects_impossible_offsets() {
        assert!(BusinessClock::from_offset_minutes(25 * 60).is_err());
    }
}
