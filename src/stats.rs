//! Progress dashboard: streak summary, mood trends and insights.

use crate::auth::AuthSession;
use crate::clock::Clock;
use crate::error::{MindfulError, Result};
use crate::models::{SessionRecord, StreakRow};
use crate::store::{SessionQuery, SessionStore, StreakStore};
use chrono::{DateTime, Datelike, Duration, Local, NaiveDate, TimeZone, Utc};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    #[default]
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn days(&self) -> i64 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::Year => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "week" | "w" => Some(Self::Week),
            "month" | "m" => Some(Self::Month),
            "year" | "y" => Some(Self::Year),
            _ => None,
        }
    }

    /// First local date inside the range ending on `today`
    pub fn first_day(&self, today: NaiveDate) -> NaiveDate {
        today - Duration::days(self.days() - 1)
    }
}

fn local_date(created_at: DateTime<Utc>) -> NaiveDate {
    created_at.with_timezone(&Local).date_naive()
}

/// Midnight local time at the start of `date`, as a server timestamp
fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Distinct days meditated since Monday
    pub days_this_week: u32,
    pub total_sessions: usize,
    pub total_minutes: u64,
}

pub fn summarize(sessions: &[SessionRecord], streak: Option<&StreakRow>, today: NaiveDate) -> ProgressSummary {
    let week_start = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    let days_this_week: BTreeSet<NaiveDate> = sessions
        .iter()
        .filter_map(|s| s.created_at.map(local_date))
        .filter(|d| *d >= week_start && *d <= today)
        .collect();
    let total_seconds: u64 = sessions.iter().map(|s| s.duration as u64).sum();

    ProgressSummary {
        current_streak: streak.map_or(0, |s| s.current_streak),
        longest_streak: streak.map_or(0, |s| s.longest_streak),
        days_this_week: days_this_week.len() as u32,
        total_sessions: sessions.len(),
        total_minutes: total_seconds / 60,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MoodEntry {
    pub date: NaiveDate,
    pub mood: String,
    pub rating: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoodTrend {
    pub range: TimeRange,
    pub counts: BTreeMap<String, usize>,
    pub dominant: Option<String>,
    /// Mean post-session rating out of 5
    pub average_rating: Option<f64>,
    /// Oldest first
    pub entries: Vec<MoodEntry>,
}

pub fn mood_trend(sessions: &[SessionRecord], range: TimeRange, today: NaiveDate) -> MoodTrend {
    let first = range.first_day(today);
    let mut entries: Vec<MoodEntry> = sessions
        .iter()
        .filter_map(|s| {
            let date = local_date(s.created_at?);
            let mood = s.mood.clone()?;
            (date >= first && date <= today).then_some(MoodEntry {
                date,
                mood,
                rating: s.rating,
            })
        })
        .collect();
    entries.sort_by_key(|e| e.date);

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in &entries {
        *counts.entry(entry.mood.clone()).or_default() += 1;
    }

    MoodTrend {
        range,
        dominant: dominant_mood(&counts),
        average_rating: mean(entries.iter().filter_map(|e| e.rating)),
        counts,
        entries,
    }
}

/// Most frequent mood; ties go to the alphabetically first
fn dominant_mood(counts: &BTreeMap<String, usize>) -> Option<String> {
    let mut best: Option<(&String, usize)> = None;
    for (mood, &count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((mood, count));
        }
    }
    best.map(|(mood, _)| mood.clone())
}

fn mean(ratings: impl Iterator<Item = u8>) -> Option<f64> {
    let (sum, n) = ratings.fold((0u32, 0u32), |(sum, n), r| (sum + r as u32, n + 1));
    (n > 0).then(|| sum as f64 / n as f64)
}

const SUGGESTIONS: [&str; 3] = [
    "Try a morning session to set the tone for your day.",
    "Add a short journal note after each session to see what shifts over time.",
    "On busy days, a five-minute sit still keeps the habit going.",
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Insights {
    pub observations: Vec<String>,
    pub suggestions: Vec<&'static str>,
}

pub fn insights(sessions: &[SessionRecord], today: NaiveDate) -> Insights {
    let mut observations = Vec::new();

    let week_ago = today - Duration::days(6);
    let recent_days: BTreeSet<NaiveDate> = sessions
        .iter()
        .filter_map(|s| s.created_at.map(local_date))
        .filter(|d| *d >= week_ago && *d <= today)
        .collect();
    observations.push(match recent_days.len() {
        0 => "You haven't meditated in the last 7 days. Today is a good day to start again.".to_string(),
        7 => "You meditated every day this past week. Wonderful consistency!".to_string(),
        n if n >= 5 => format!("You meditated on {} of the last 7 days. Great consistency!", n),
        n => format!("You meditated on {} of the last 7 days.", n),
    });

    if let Some(line) = duration_vs_rating(sessions) {
        observations.push(line.to_string());
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for mood in sessions.iter().filter_map(|s| s.mood.as_ref()) {
        *counts.entry(mood.clone()).or_default() += 1;
    }
    if let Some(mood) = dominant_mood(&counts) {
        observations.push(format!("You most often feel {} after meditating.", mood));
    }

    Insights {
        observations,
        suggestions: SUGGESTIONS.to_vec(),
    }
}

/// Compare ratings of sessions at or above the median duration with the rest
fn duration_vs_rating(sessions: &[SessionRecord]) -> Option<&'static str> {
    let rated: Vec<(u32, u8)> = sessions
        .iter()
        .filter_map(|s| Some((s.duration, s.rating?)))
        .collect();
    let mut durations: Vec<u32> = rated.iter().map(|(d, _)| *d).collect();
    durations.sort_unstable();
    let median = *durations.get(durations.len() / 2)?;

    let longer = mean(rated.iter().filter(|(d, _)| *d >= median).map(|(_, r)| *r))?;
    let shorter = mean(rated.iter().filter(|(d, _)| *d < median).map(|(_, r)| *r))?;
    if longer > shorter {
        Some("Your longer sessions tend to leave you feeling better.")
    } else if shorter > longer {
        Some("Shorter sessions seem to suit you best right now.")
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dashboard {
    pub summary: ProgressSummary,
    pub trend: MoodTrend,
    pub insights: Insights,
}

pub fn load_dashboard<S>(
    store: &S,
    auth: Option<&AuthSession>,
    range: TimeRange,
    clock: &dyn Clock,
) -> Result<Dashboard>
where
    S: SessionStore + StreakStore,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
    let today = clock.today();

    let all = store.sessions(auth, &SessionQuery::default())?;
    let streak = store.streak(auth)?;
    let in_range = match start_of_day(range.first_day(today)) {
        Some(since) => store.sessions(auth, &SessionQuery::since(since))?,
        None => all.clone(),
    };
    tracing::debug!(range = range.as_str(), total = all.len(), in_range = in_range.len(), "dashboard loaded");

    Ok(Dashboard {
        summary: summarize(&all, streak.as_ref(), today),
        trend: mood_trend(&in_range, range, today),
        insights: insights(&all, today),
    })
}
