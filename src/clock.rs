//! Wall clock used for calendar-day logic.

use chrono::{DateTime, Duration, Local, NaiveDate};

pub trait Clock {
    fn now(&self) -> DateTime<Local>;

    /// Calendar date in the user's local timezone
    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn yesterday(&self) -> NaiveDate {
        self.today() - Duration::days(1)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Clock pinned to one instant
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Local>);

#[cfg(test)]
impl FixedClock {
    /// Noon local time on the given date
    pub fn on(date: NaiveDate) -> Self {
        use chrono::TimeZone;
        let noon = date.and_hms_opt(12, 0, 0).expect("valid time");
        Self(Local.from_local_datetime(&noon).earliest().expect("valid local time"))
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.0
    }
}
