//! Rows exchanged with the hosted backend.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A persisted meditation session
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionRecord {
    #[serde(default, deserialize_with = "opt_id_string")]
    pub id: Option<String>,
    pub user_id: String,
    pub duration: u32,
    pub completed: bool,
    #[serde(default)]
    pub mood: Option<String>,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub journal_text: Option<String>,
    /// Assigned by the server on insert
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Insert payload for `meditation_sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSessionRecord {
    pub user_id: String,
    pub duration: u32,
    pub completed: bool,
    pub mood: Option<String>,
    pub rating: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_text: Option<String>,
}

/// One row per user in `streaks`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreakRow {
    pub user_id: String,
    #[serde(default)]
    pub current_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub last_meditation_date: Option<NaiveDate>,
}

/// How an achievement's progress is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementType {
    MorningSessions,
    Streak,
    MoodCount,
    TotalDays,
    #[serde(other)]
    Unknown,
}

impl RequirementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MorningSessions => "morning_sessions",
            Self::Streak => "streak",
            Self::MoodCount => "mood_count",
            Self::TotalDays => "total_days",
            Self::Unknown => "unknown",
        }
    }
}

/// Entry in the read-only achievement catalog
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Achievement {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub requirement_type: RequirementType,
    pub requirement_value: u32,
    /// Target mood for `mood_count` achievements
    #[serde(default)]
    pub requirement_mood: Option<String>,
}

/// Row of the `user_achievements` join table
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct UnlockedAchievement {
    pub user_id: String,
    #[serde(deserialize_with = "id_string")]
    pub achievement_id: String,
    #[serde(default)]
    pub unlocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Initials for display, falling back to the first letter of the email
    pub fn initials(&self, email: Option<&str>) -> String {
        let from_name: String = self
            .full_name
            .as_deref()
            .unwrap_or("")
            .split_whitespace()
            .filter_map(|part| part.chars().next())
            .collect();
        if !from_name.is_empty() {
            return from_name.to_uppercase();
        }
        email
            .and_then(|e| e.chars().next())
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_default()
    }
}

/// Partial update for `profiles`; unset fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

// Tables may use uuid or bigint keys
fn id_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    RawId::deserialize(d).map(String::from)
}

fn opt_id_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawId>::deserialize(d)?.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_session_record_from_backend_row() {
        let row = json!({
            "id": 42,
            "user_id": "u-1",
            "duration": 1200,
            "completed": true,
            "mood": "Calm",
            "rating": 4,
            "journal_text": null,
            "created_at": "2024-03-01T07:15:00.123456+00:00"
        });
        let record: SessionRecord = serde_json::from_value(row).unwrap();
        assert_eq!(record.id.as_deref(), Some("42"));
        assert_eq!(record.rating, Some(4));
        assert!(record.journal_text.is_none());
        assert!(record.created_at.is_some());
    }

    #[test]
    fn test_unknown_requirement_type() {
        let row = json!({
            "id": "a-9",
            "title": "Explorer",
            "requirement_type": "meditation_types",
            "requirement_value": 5
        });
        let achievement: Achievement = serde_json::from_value(row).unwrap();
        assert_eq!(achievement.requirement_type, RequirementType::Unknown);
        assert!(achievement.requirement_mood.is_none());
    }

    #[test]
    fn test_new_session_omits_missing_journal() {
        let record = NewSessionRecord {
            user_id: "u-1".to_string(),
            duration: 600,
            completed: true,
            mood: Some("Happy".to_string()),
            rating: Some(5),
            journal_text: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("journal_text").is_none());
        assert_eq!(value["duration"], 600);
    }

    #[test]
    fn test_profile_initials() {
        let mut profile = Profile {
            id: "u-1".to_string(),
            full_name: Some("ada lovelace".to_string()),
            ..Default::default()
        };
        assert_eq!(profile.initials(None), "AL");
        profile.full_name = None;
        assert_eq!(profile.initials(Some("zed@example.com")), "Z");
        assert_eq!(profile.initials(None), "");
    }
}
