//! Achievement progress and unlock sync.
//!
//! Progress is recomputed from persisted sessions and the streak row on every
//! load. An achievement counts as unlocked only when it is in the user's
//! unlocked set; with auto-unlock on, `sync` promotes any achievement whose
//! progress has reached its requirement into that set.

use crate::auth::AuthSession;
use crate::config::AchievementsConfig;
use crate::error::{MindfulError, Result};
use crate::models::{Achievement, RequirementType, SessionRecord};
use crate::store::{AchievementStore, SessionQuery, SessionStore, StreakStore};
use chrono::{DateTime, Local, Timelike, Utc};
use std::collections::HashSet;

/// Mood counted by `mood_count` achievements that don't name one
pub const DEFAULT_TARGET_MOOD: &str = "Calm";

/// Local wall-clock hours `[start, end)` that count as morning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MorningWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl Default for MorningWindow {
    fn default() -> Self {
        Self {
            start_hour: 5,
            end_hour: 12,
        }
    }
}

impl MorningWindow {
    /// Whether a server timestamp falls in the window, judged in local time
    pub fn contains(&self, created_at: DateTime<Utc>) -> bool {
        let hour = created_at.with_timezone(&Local).hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AchievementRules {
    pub morning: MorningWindow,
    pub auto_unlock: bool,
}

impl Default for AchievementRules {
    fn default() -> Self {
        Self {
            morning: MorningWindow::default(),
            auto_unlock: true,
        }
    }
}

impl From<&AchievementsConfig> for AchievementRules {
    fn from(config: &AchievementsConfig) -> Self {
        Self {
            morning: MorningWindow {
                start_hour: config.morning_start_hour,
                end_hour: config.morning_end_hour,
            },
            auto_unlock: config.auto_unlock,
        }
    }
}

/// One catalog entry with the user's standing against it
#[derive(Debug, Clone, PartialEq)]
pub struct AchievementView {
    pub achievement: Achievement,
    /// Raw measured value; may exceed the requirement
    pub progress: u32,
    pub unlocked: bool,
}

impl AchievementView {
    /// Progress for display, capped at the requirement
    pub fn display_progress(&self) -> u32 {
        self.progress.min(self.achievement.requirement_value)
    }

    /// Completion as a percentage in [0, 100]
    pub fn percent(&self) -> f64 {
        let required = self.achievement.requirement_value;
        if required == 0 {
            return 100.0;
        }
        (self.display_progress() as f64 * 100.0 / required as f64).clamp(0.0, 100.0)
    }

    pub fn is_complete(&self) -> bool {
        self.achievement.requirement_type != RequirementType::Unknown
            && self.progress >= self.achievement.requirement_value
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AchievementBoard {
    pub views: Vec<AchievementView>,
    /// Achievements promoted into the unlocked set by this sync
    pub newly_unlocked: Vec<Achievement>,
}

impl AchievementBoard {
    pub fn unlocked_count(&self) -> usize {
        self.views.iter().filter(|v| v.unlocked).count()
    }
}

/// Measures progress for one achievement, querying the store per requirement type.
///
/// Session reads are memoized so a catalog with several session-based
/// achievements costs one fetch per distinct query.
struct ProgressProbe<'a, S> {
    store: &'a S,
    auth: &'a AuthSession,
    morning: MorningWindow,
    all_sessions: Option<Vec<SessionRecord>>,
    current_streak: Option<u32>,
}

impl<'a, S> ProgressProbe<'a, S>
where
    S: SessionStore + StreakStore,
{
    fn new(store: &'a S, auth: &'a AuthSession, morning: MorningWindow) -> Self {
        Self {
            store,
            auth,
            morning,
            all_sessions: None,
            current_streak: None,
        }
    }

    fn sessions(&mut self) -> Result<&[SessionRecord]> {
        if self.all_sessions.is_none() {
            let rows = self.store.sessions(self.auth, &SessionQuery::default())?;
            self.all_sessions = Some(rows);
        }
        Ok(self.all_sessions.as_deref().unwrap_or_default())
    }

    fn measure(&mut self, achievement: &Achievement) -> Result<u32> {
        let value = match achievement.requirement_type {
            RequirementType::MorningSessions => {
                let morning = self.morning;
                self.sessions()?
                    .iter()
                    .filter_map(|s| s.created_at)
                    .filter(|created| morning.contains(*created))
                    .count()
            }
            RequirementType::Streak => {
                if self.current_streak.is_none() {
                    let row = self.store.streak(self.auth)?;
                    self.current_streak = Some(row.map_or(0, |r| r.current_streak));
                }
                return Ok(self.current_streak.unwrap_or(0));
            }
            RequirementType::MoodCount => {
                let mood = achievement
                    .requirement_mood
                    .as_deref()
                    .unwrap_or(DEFAULT_TARGET_MOOD);
                self.store
                    .sessions(self.auth, &SessionQuery::with_mood(mood))?
                    .len()
            }
            RequirementType::TotalDays => self.sessions()?.len(),
            RequirementType::Unknown => {
                tracing::warn!(id = %achievement.id, "achievement has an unknown requirement type");
                0
            }
        };
        Ok(u32::try_from(value).unwrap_or(u32::MAX))
    }
}

/// Load the catalog with progress and unlock state, auto-unlocking when enabled.
///
/// A failed unlock insert is logged and skipped so the rest of the board
/// still loads; the next sync will retry it.
pub fn sync<S>(store: &S, auth: Option<&AuthSession>, rules: AchievementRules) -> Result<AchievementBoard>
where
    S: SessionStore + StreakStore + AchievementStore,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;

    let catalog = store.catalog(auth)?;
    let unlocked: HashSet<String> = store
        .unlocked(auth)?
        .into_iter()
        .map(|u| u.achievement_id)
        .collect();

    let mut probe = ProgressProbe::new(store, auth, rules.morning);
    let mut board = AchievementBoard::default();

    for achievement in catalog {
        let progress = probe.measure(&achievement)?;
        let mut view = AchievementView {
            unlocked: unlocked.contains(&achievement.id),
            achievement,
            progress,
        };

        if rules.auto_unlock && !view.unlocked && view.is_complete() {
            match store.unlock(auth, &view.achievement.id) {
                Ok(()) => {
                    tracing::info!(
                        id = %view.achievement.id,
                        title = %view.achievement.title,
                        requirement = view.achievement.requirement_type.as_str(),
                        "achievement unlocked"
                    );
                    view.unlocked = true;
                    board.newly_unlocked.push(view.achievement.clone());
                }
                Err(e) => {
                    tracing::warn!(id = %view.achievement.id, error = %e, "failed to unlock achievement");
                }
            }
        }

        board.views.push(view);
    }

    Ok(board)
}
