//! Narrow interfaces to the hosted backend's tables and object storage.
//!
//! Every call takes the caller's `AuthSession` explicitly; nothing here
//! looks up an ambient "current user".

#[cfg(test)]
pub mod memory;

use crate::auth::AuthSession;
use crate::error::StoreError;
use crate::models::{
    Achievement, NewSessionRecord, Profile, ProfileUpdate, SessionRecord, StreakRow,
    UnlockedAchievement,
};
use chrono::{DateTime, Utc};

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters for reading a user's sessions. Results are always newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionQuery {
    pub since: Option<DateTime<Utc>>,
    pub mood: Option<String>,
    pub limit: Option<usize>,
}

impl SessionQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn since(since: DateTime<Utc>) -> Self {
        Self {
            since: Some(since),
            ..Default::default()
        }
    }

    pub fn with_mood(mood: &str) -> Self {
        Self {
            mood: Some(mood.to_string()),
            ..Default::default()
        }
    }

    /// Whether a record satisfies the filters (limit aside)
    #[cfg(test)]
    pub fn matches(&self, record: &SessionRecord) -> bool {
        if let Some(since) = self.since {
            match record.created_at {
                Some(created) if created >= since => {}
                _ => return false,
            }
        }
        if let Some(mood) = &self.mood {
            if record.mood.as_deref() != Some(mood.as_str()) {
                return false;
            }
        }
        true
    }
}

pub trait SessionStore {
    fn insert_session(&self, auth: &AuthSession, record: &NewSessionRecord) -> StoreResult<()>;
    fn sessions(&self, auth: &AuthSession, query: &SessionQuery) -> StoreResult<Vec<SessionRecord>>;
}

pub trait StreakStore {
    /// At most one row per user
    fn streak(&self, auth: &AuthSession) -> StoreResult<Option<StreakRow>>;
    fn upsert_streak(&self, auth: &AuthSession, row: &StreakRow) -> StoreResult<()>;
}

pub trait AchievementStore {
    fn catalog(&self, auth: &AuthSession) -> StoreResult<Vec<Achievement>>;
    fn unlocked(&self, auth: &AuthSession) -> StoreResult<Vec<UnlockedAchievement>>;
    fn unlock(&self, auth: &AuthSession, achievement_id: &str) -> StoreResult<()>;
}

pub trait ProfileStore {
    fn profile(&self, auth: &AuthSession) -> StoreResult<Option<Profile>>;
    fn update_profile(&self, auth: &AuthSession, update: &ProfileUpdate) -> StoreResult<()>;
}

pub trait ObjectStore {
    /// Upload, overwriting anything already at `path`
    fn upload(
        &self,
        auth: &AuthSession,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<()>;
    fn public_url(&self, bucket: &str, path: &str) -> String;
}
