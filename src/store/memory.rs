//! In-memory backend for tests.

use super::{SessionQuery, StoreResult};
use crate::auth::{AuthSession, IdentityProvider, SignUpOutcome, User};
use crate::error::StoreError;
use crate::models::{
    Achievement, NewSessionRecord, Profile, ProfileUpdate, SessionRecord, StreakRow,
    UnlockedAchievement,
};
use chrono::{DateTime, Utc};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryBackend {
    pub sessions: RefCell<Vec<SessionRecord>>,
    pub streaks: RefCell<HashMap<String, StreakRow>>,
    pub achievements: RefCell<Vec<Achievement>>,
    pub unlocked: RefCell<Vec<UnlockedAchievement>>,
    pub profiles: RefCell<HashMap<String, Profile>>,
    pub objects: RefCell<HashMap<String, Vec<u8>>>,
    pub passwords: RefCell<HashMap<String, String>>,
    /// Operation name that fails on its next call
    fail_on: RefCell<Option<&'static str>>,
    /// Timestamp stamped on inserted sessions; `Utc::now()` if unset
    pub insert_time: Cell<Option<DateTime<Utc>>>,
    pub calls: RefCell<Vec<&'static str>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, op: &'static str) {
        *self.fail_on.borrow_mut() = Some(op);
    }

    pub fn seed_session(&self, record: SessionRecord) {
        self.sessions.borrow_mut().push(record);
    }

    pub fn seed_streak(&self, row: StreakRow) {
        self.streaks.borrow_mut().insert(row.user_id.clone(), row);
    }

    fn enter(&self, op: &'static str) -> StoreResult<()> {
        self.calls.borrow_mut().push(op);
        let mut fail_on = self.fail_on.borrow_mut();
        if *fail_on == Some(op) {
            *fail_on = None;
            return Err(StoreError::Http {
                status: 500,
                body: format!("injected failure in {}", op),
            });
        }
        Ok(())
    }
}

impl super::SessionStore for MemoryBackend {
    fn insert_session(&self, auth: &AuthSession, record: &NewSessionRecord) -> StoreResult<()> {
        self.enter("insert_session")?;
        let mut sessions = self.sessions.borrow_mut();
        let id = sessions.len() + 1;
        sessions.push(SessionRecord {
            id: Some(id.to_string()),
            user_id: auth.user_id().to_string(),
            duration: record.duration,
            completed: record.completed,
            mood: record.mood.clone(),
            rating: record.rating,
            journal_text: record.journal_text.clone(),
            created_at: Some(self.insert_time.get().unwrap_or_else(Utc::now)),
        });
        Ok(())
    }

    fn sessions(&self, auth: &AuthSession, query: &SessionQuery) -> StoreResult<Vec<SessionRecord>> {
        self.enter("sessions")?;
        let mut rows: Vec<SessionRecord> = self
            .sessions
            .borrow()
            .iter()
            .filter(|r| r.user_id == auth.user_id() && query.matches(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

impl super::StreakStore for MemoryBackend {
    fn streak(&self, auth: &AuthSession) -> StoreResult<Option<StreakRow>> {
        self.enter("streak")?;
        Ok(self.streaks.borrow().get(auth.user_id()).cloned())
    }

    fn upsert_streak(&self, _auth: &AuthSession, row: &StreakRow) -> StoreResult<()> {
        self.enter("upsert_streak")?;
        self.streaks
            .borrow_mut()
            .insert(row.user_id.clone(), row.clone());
        Ok(())
    }
}

impl super::AchievementStore for MemoryBackend {
    fn catalog(&self, _auth: &AuthSession) -> StoreResult<Vec<Achievement>> {
        self.enter("catalog")?;
        Ok(self.achievements.borrow().clone())
    }

    fn unlocked(&self, auth: &AuthSession) -> StoreResult<Vec<UnlockedAchievement>> {
        self.enter("unlocked")?;
        Ok(self
            .unlocked
            .borrow()
            .iter()
            .filter(|u| u.user_id == auth.user_id())
            .cloned()
            .collect())
    }

    fn unlock(&self, auth: &AuthSession, achievement_id: &str) -> StoreResult<()> {
        self.enter("unlock")?;
        self.unlocked.borrow_mut().push(UnlockedAchievement {
            user_id: auth.user_id().to_string(),
            achievement_id: achievement_id.to_string(),
            unlocked_at: Some(Utc::now()),
        });
        Ok(())
    }
}

impl super::ProfileStore for MemoryBackend {
    fn profile(&self, auth: &AuthSession) -> StoreResult<Option<Profile>> {
        self.enter("profile")?;
        Ok(self.profiles.borrow().get(auth.user_id()).cloned())
    }

    fn update_profile(&self, auth: &AuthSession, update: &ProfileUpdate) -> StoreResult<()> {
        self.enter("update_profile")?;
        let mut profiles = self.profiles.borrow_mut();
        let profile = profiles
            .get_mut(auth.user_id())
            .ok_or_else(|| StoreError::Http {
                status: 404,
                body: format!("no profile for {}", auth.user_id()),
            })?;
        if let Some(username) = &update.username {
            profile.username = Some(username.clone());
        }
        if let Some(full_name) = &update.full_name {
            profile.full_name = Some(full_name.clone());
        }
        if let Some(avatar_url) = &update.avatar_url {
            profile.avatar_url = Some(avatar_url.clone());
        }
        if update.updated_at.is_some() {
            profile.updated_at = update.updated_at;
        }
        Ok(())
    }
}

impl super::ObjectStore for MemoryBackend {
    fn upload(
        &self,
        _auth: &AuthSession,
        bucket: &str,
        path: &str,
        _content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        self.enter("upload")?;
        self.objects
            .borrow_mut()
            .insert(format!("{}/{}", bucket, path), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("memory://{}/{}", bucket, path)
    }
}

impl IdentityProvider for MemoryBackend {
    fn sign_in(&self, email: &str, password: &str) -> StoreResult<AuthSession> {
        self.enter("sign_in")?;
        match self.passwords.borrow().get(email) {
            Some(stored) if stored == password => Ok(AuthSession {
                access_token: format!("token-{}", email),
                refresh_token: None,
                expires_at: None,
                user: User {
                    id: format!("id-{}", email),
                    email: Some(email.to_string()),
                },
            }),
            _ => Err(StoreError::Http {
                status: 400,
                body: "Invalid login credentials".to_string(),
            }),
        }
    }

    fn sign_up(&self, email: &str, password: &str) -> StoreResult<SignUpOutcome> {
        self.enter("sign_up")?;
        self.passwords
            .borrow_mut()
            .insert(email.to_string(), password.to_string());
        Ok(SignUpOutcome::PendingVerification {
            email: email.to_string(),
        })
    }

    fn sign_out(&self, _auth: &AuthSession) -> StoreResult<()> {
        self.enter("sign_out")
    }

    fn update_password(&self, auth: &AuthSession, new_password: &str) -> StoreResult<()> {
        self.enter("update_password")?;
        if let Some(email) = &auth.user.email {
            self.passwords
                .borrow_mut()
                .insert(email.clone(), new_password.to_string());
        }
        Ok(())
    }
}
