//! Consecutive-day streak arithmetic.

use crate::models::StreakRow;
use chrono::NaiveDate;

/// Which rule produced the new streak value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakChange {
    /// No prior row, or the last session was before yesterday
    Started,
    /// Last session was yesterday
    Extended,
    /// Already meditated today
    Unchanged,
}

impl StreakChange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Extended => "extended",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Compute the streak row to write after a session completed on `today`.
///
/// Both calendar days come from the caller's clock. `longest_streak` never
/// decreases and is always at least `current_streak`.
pub fn advance(
    prev: Option<&StreakRow>,
    user_id: &str,
    today: NaiveDate,
    yesterday: NaiveDate,
) -> (StreakRow, StreakChange) {
    let (current, change) = match prev {
        Some(row) if row.last_meditation_date == Some(yesterday) => {
            (row.current_streak.saturating_add(1), StreakChange::Extended)
        }
        Some(row) if row.last_meditation_date == Some(today) => {
            (row.current_streak, StreakChange::Unchanged)
        }
        _ => (1, StreakChange::Started),
    };

    let longest = prev.map_or(0, |row| row.longest_streak).max(current);

    (
        StreakRow {
            user_id: user_id.to_string(),
            current_streak: current,
            longest_streak: longest,
            last_meditation_date: Some(today),
        },
        change,
    )
}
