//! Hosted backend client: auth, REST tables and object storage over HTTP+JSON.

use crate::auth::{AuthSession, IdentityProvider, SignUpOutcome, User};
use crate::error::StoreError;
use crate::models::{
    Achievement, NewSessionRecord, Profile, ProfileUpdate, SessionRecord, StreakRow,
    UnlockedAchievement,
};
use crate::store::{
    AchievementStore, ObjectStore, ProfileStore, SessionQuery, SessionStore, StoreResult,
    StreakStore,
};
use chrono::{SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SESSIONS: &str = "meditation_sessions";
const STREAKS: &str = "streaks";
const ACHIEVEMENTS: &str = "achievements";
const USER_ACHIEVEMENTS: &str = "user_achievements";
const PROFILES: &str = "profiles";

pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    agent: ureq::Agent,
    timeout: Duration,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str, timeout_ms: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            agent: ureq::Agent::new(),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Request with the project key, acting as the user when `auth` is given
    fn request(&self, method: &str, path: &str, auth: Option<&AuthSession>) -> ureq::Request {
        let token = auth.map_or(self.anon_key.as_str(), |a| a.access_token.as_str());
        self.agent
            .request(method, &format!("{}{}", self.base_url, path))
            .timeout(self.timeout)
            .set("apikey", &self.anon_key)
            .set("Authorization", &format!("Bearer {}", token))
    }

    fn table(&self, method: &str, table: &str, auth: &AuthSession, params: &[(String, String)]) -> ureq::Request {
        params
            .iter()
            .fold(self.request(method, &format!("/rest/v1/{}", table), Some(auth)), |req, (k, v)| {
                req.query(k, v)
            })
    }

    fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        auth: &AuthSession,
        params: &[(String, String)],
    ) -> StoreResult<Vec<T>> {
        let resp = send(table, self.table("GET", table, auth, params).call())?;
        read_json(table, resp)
    }

    fn write(
        &self,
        method: &str,
        table: &str,
        auth: &AuthSession,
        params: &[(String, String)],
        prefer: &str,
        body: Value,
    ) -> StoreResult<()> {
        let req = self
            .table(method, table, auth, params)
            .set("Prefer", prefer)
            .set("Content-Type", "application/json");
        send(table, req.send_json(body))?;
        Ok(())
    }

    fn auth_call(&self, method: &str, path: &str, auth: Option<&AuthSession>, body: Value) -> StoreResult<ureq::Response> {
        let req = self
            .request(method, path, auth)
            .set("Content-Type", "application/json");
        send(path, req.send_json(body))
    }
}

fn send(context: &str, result: Result<ureq::Response, ureq::Error>) -> StoreResult<ureq::Response> {
    match result {
        Ok(resp) => {
            tracing::debug!(endpoint = context, status = resp.status(), "backend call");
            Ok(resp)
        }
        Err(ureq::Error::Status(status, resp)) => {
            let body = resp.into_string().unwrap_or_default();
            tracing::debug!(endpoint = context, status, "backend call failed");
            Err(StoreError::Http { status, body })
        }
        Err(e) => Err(StoreError::Transport(e.to_string())),
    }
}

fn read_json<T: DeserializeOwned>(context: &str, resp: ureq::Response) -> StoreResult<T> {
    let text = resp
        .into_string()
        .map_err(|e| StoreError::Transport(e.to_string()))?;
    serde_json::from_str(&text).map_err(|source| StoreError::Decode {
        context: context.to_string(),
        source,
    })
}

fn eq(column: &str, value: &str) -> (String, String) {
    (column.to_string(), format!("eq.{}", value))
}

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

/// Query parameters selecting a user's sessions, newest first
fn session_params(user_id: &str, query: &SessionQuery) -> Vec<(String, String)> {
    let mut params = vec![
        param("select", "*"),
        eq("user_id", user_id),
        param("order", "created_at.desc"),
    ];
    if let Some(since) = query.since {
        params.push(param(
            "created_at",
            format!("gte.{}", since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ));
    }
    if let Some(mood) = &query.mood {
        params.push(eq("mood", mood));
    }
    if let Some(limit) = query.limit {
        params.push(param("limit", limit.to_string()));
    }
    params
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now_unix: i64) -> AuthSession {
        AuthSession {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_at
                .or_else(|| self.expires_in.map(|secs| now_unix + secs)),
            user: self.user,
        }
    }
}

/// Sign-up returns a full session when confirmation is off, otherwise just the user
fn parse_sign_up(email: &str, body: Value, now_unix: i64) -> StoreResult<SignUpOutcome> {
    if body.get("access_token").is_some() {
        let token: TokenResponse = serde_json::from_value(body).map_err(|source| StoreError::Decode {
            context: "signup".to_string(),
            source,
        })?;
        return Ok(SignUpOutcome::Active(token.into_session(now_unix)));
    }
    Ok(SignUpOutcome::PendingVerification {
        email: email.to_string(),
    })
}

impl SessionStore for SupabaseClient {
    fn insert_session(&self, auth: &AuthSession, record: &NewSessionRecord) -> StoreResult<()> {
        let body = serde_json::to_value(record).map_err(|source| StoreError::Decode {
            context: SESSIONS.to_string(),
            source,
        })?;
        self.write("POST", SESSIONS, auth, &[], "return=minimal", body)
    }

    fn sessions(&self, auth: &AuthSession, query: &SessionQuery) -> StoreResult<Vec<SessionRecord>> {
        self.select(SESSIONS, auth, &session_params(auth.user_id(), query))
    }
}

impl StreakStore for SupabaseClient {
    fn streak(&self, auth: &AuthSession) -> StoreResult<Option<StreakRow>> {
        let rows: Vec<StreakRow> = self.select(
            STREAKS,
            auth,
            &[param("select", "*"), eq("user_id", auth.user_id())],
        )?;
        Ok(rows.into_iter().next())
    }

    fn upsert_streak(&self, auth: &AuthSession, row: &StreakRow) -> StoreResult<()> {
        let body = serde_json::to_value(row).map_err(|source| StoreError::Decode {
            context: STREAKS.to_string(),
            source,
        })?;
        self.write(
            "POST",
            STREAKS,
            auth,
            &[param("on_conflict", "user_id")],
            "resolution=merge-duplicates,return=minimal",
            body,
        )
    }
}

impl AchievementStore for SupabaseClient {
    fn catalog(&self, auth: &AuthSession) -> StoreResult<Vec<Achievement>> {
        self.select(
            ACHIEVEMENTS,
            auth,
            &[param("select", "*"), param("order", "requirement_value.asc")],
        )
    }

    fn unlocked(&self, auth: &AuthSession) -> StoreResult<Vec<UnlockedAchievement>> {
        self.select(
            USER_ACHIEVEMENTS,
            auth,
            &[param("select", "*"), eq("user_id", auth.user_id())],
        )
    }

    fn unlock(&self, auth: &AuthSession, achievement_id: &str) -> StoreResult<()> {
        self.write(
            "POST",
            USER_ACHIEVEMENTS,
            auth,
            &[],
            "return=minimal",
            json!({ "user_id": auth.user_id(), "achievement_id": achievement_id }),
        )
    }
}

impl ProfileStore for SupabaseClient {
    fn profile(&self, auth: &AuthSession) -> StoreResult<Option<Profile>> {
        let rows: Vec<Profile> = self.select(
            PROFILES,
            auth,
            &[param("select", "*"), eq("id", auth.user_id())],
        )?;
        Ok(rows.into_iter().next())
    }

    fn update_profile(&self, auth: &AuthSession, update: &ProfileUpdate) -> StoreResult<()> {
        let body = serde_json::to_value(update).map_err(|source| StoreError::Decode {
            context: PROFILES.to_string(),
            source,
        })?;
        self.write(
            "PATCH",
            PROFILES,
            auth,
            &[eq("id", auth.user_id())],
            "return=minimal",
            body,
        )
    }
}

impl ObjectStore for SupabaseClient {
    fn upload(
        &self,
        auth: &AuthSession,
        bucket: &str,
        path: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> StoreResult<()> {
        let req = self
            .request("POST", &format!("/storage/v1/object/{}/{}", bucket, path), Some(auth))
            .set("Content-Type", content_type)
            .set("x-upsert", "true");
        send(bucket, req.send_bytes(bytes))?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path)
    }
}

impl IdentityProvider for SupabaseClient {
    fn sign_in(&self, email: &str, password: &str) -> StoreResult<AuthSession> {
        let resp = self.auth_call(
            "POST",
            "/auth/v1/token?grant_type=password",
            None,
            json!({ "email": email, "password": password }),
        )?;
        let token: TokenResponse = read_json("token", resp)?;
        Ok(token.into_session(Utc::now().timestamp()))
    }

    fn sign_up(&self, email: &str, password: &str) -> StoreResult<SignUpOutcome> {
        let resp = self.auth_call(
            "POST",
            "/auth/v1/signup",
            None,
            json!({ "email": email, "password": password }),
        )?;
        let body: Value = read_json("signup", resp)?;
        parse_sign_up(email, body, Utc::now().timestamp())
    }

    fn sign_out(&self, auth: &AuthSession) -> StoreResult<()> {
        self.auth_call("POST", "/auth/v1/logout", Some(auth), json!({}))?;
        Ok(())
    }

    fn update_password(&self, auth: &AuthSession, new_password: &str) -> StoreResult<()> {
        self.auth_call(
            "PUT",
            "/auth/v1/user",
            Some(auth),
            json!({ "password": new_password }),
        )?;
        Ok(())
    }
}
