//! Signed-in identity, credential checks and the local credential file.

use crate::error::{MindfulError, Result, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIN_PASSWORD_LEN: usize = 6;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session as issued by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: User,
}

/// Subset of the access token's JWT payload
#[derive(Debug, Clone, Deserialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub exp: Option<i64>,
}

impl AuthSession {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    /// Decode the access token payload without verifying its signature
    pub fn claims(&self) -> Option<TokenClaims> {
        decode_claims(&self.access_token)
    }

    /// Expiry from the session, falling back to the token's `exp`
    pub fn expiry(&self) -> Option<i64> {
        self.expires_at.or_else(|| self.claims().and_then(|c| c.exp))
    }

    pub fn is_expired(&self, now_unix: i64) -> bool {
        self.expiry().is_some_and(|exp| exp <= now_unix)
    }
}

pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Result of a sign-up request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// Email confirmation disabled: the user is signed in right away
    Active(AuthSession),
    /// A confirmation email was sent
    PendingVerification { email: String },
}

/// Narrow interface to the identity provider
pub trait IdentityProvider {
    fn sign_in(&self, email: &str, password: &str) -> std::result::Result<AuthSession, StoreError>;
    fn sign_up(&self, email: &str, password: &str) -> std::result::Result<SignUpOutcome, StoreError>;
    fn sign_out(&self, auth: &AuthSession) -> std::result::Result<(), StoreError>;
    fn update_password(&self, auth: &AuthSession, new_password: &str) -> std::result::Result<(), StoreError>;
}

pub fn validate_email(email: &str) -> Result<()> {
    if EMAIL_RE.is_match(email.trim()) {
        Ok(())
    } else {
        Err(MindfulError::validation(format!("'{}' is not a valid email address", email)))
    }
}

pub fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(MindfulError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Persists the current auth session between runs
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.mindful/auth.json`
    pub fn default_location() -> Option<Self> {
        dirs::home_dir().map(|home| Self::new(home.join(".mindful").join("auth.json")))
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load a saved session; a missing file means signed out
    pub fn load(&self) -> Result<Option<AuthSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| MindfulError::io(format!("reading {}", self.path.display()), e))?;
        match serde_json::from_str(&content) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "ignoring unreadable credentials");
                Ok(None)
            }
        }
    }

    pub fn save(&self, session: &AuthSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MindfulError::io(format!("creating {}", parent.display()), e))?;
        }
        let content = serde_json::to_string_pretty(session)
            .map_err(|e| MindfulError::io("serializing auth session", e.into()))?;
        std::fs::write(&self.path, content)
            .map_err(|e| MindfulError::io(format!("writing {}", self.path.display()), e))?;
        restrict_permissions(&self.path);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MindfulError::io(format!("removing {}", self.path.display()), e)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::warn!(path = %path.display(), error = %e, "could not restrict credential file");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// The signed-in user, if any, kept in sync with the credential file
#[derive(Debug, Default)]
pub struct Identity {
    session: Option<AuthSession>,
    credentials: Option<CredentialStore>,
}

impl Identity {
    /// Pick up a saved session, discarding it if it has expired
    pub fn restore(credentials: Option<CredentialStore>, now_unix: i64) -> Result<Self> {
        let session = match &credentials {
            Some(store) => store.load()?,
            None => None,
        };
        let session = match session {
            Some(s) if s.is_expired(now_unix) => {
                tracing::info!(user_id = %s.user_id(), "saved session expired");
                if let Some(store) = &credentials {
                    store.clear()?;
                }
                None
            }
            other => other,
        };
        Ok(Self {
            session,
            credentials,
        })
    }

    pub fn current(&self) -> Option<&AuthSession> {
        self.session.as_ref()
    }

    pub fn sign_in<P>(&mut self, provider: &P, email: &str, password: &str) -> Result<&AuthSession>
    where
        P: IdentityProvider + ?Sized,
    {
        let email = email.trim();
        validate_email(email)?;
        if password.is_empty() {
            return Err(MindfulError::validation("Password cannot be empty"));
        }
        let session = provider.sign_in(email, password)?;
        self.adopt(session)
    }

    /// Register a new account. The user is signed in only if the provider
    /// returns a session straight away.
    pub fn sign_up<P>(&mut self, provider: &P, email: &str, password: &str) -> Result<SignUpOutcome>
    where
        P: IdentityProvider + ?Sized,
    {
        let email = email.trim();
        validate_email(email)?;
        validate_password(password)?;
        let outcome = provider.sign_up(email, password)?;
        if let SignUpOutcome::Active(session) = &outcome {
            self.adopt(session.clone())?;
        }
        Ok(outcome)
    }

    /// Sign out locally even if the provider call fails. Returns the id of
    /// the user who was signed in.
    pub fn sign_out<P>(&mut self, provider: &P) -> Result<String>
    where
        P: IdentityProvider + ?Sized,
    {
        let session = self.session.take().ok_or(MindfulError::NotAuthenticated)?;
        if let Err(e) = provider.sign_out(&session) {
            tracing::warn!(error = %e, "remote sign out failed; clearing local session anyway");
        }
        if let Some(store) = &self.credentials {
            store.clear()?;
        }
        Ok(session.user.id)
    }

    fn adopt(&mut self, session: AuthSession) -> Result<&AuthSession> {
        if let Some(store) = &self.credentials {
            store.save(&session)?;
        }
        tracing::info!(user_id = %session.user_id(), "signed in");
        Ok(self.session.insert(session))
    }
}

#[cfg(test)]
pub(crate) fn test_session(user_id: &str) -> AuthSession {
    AuthSession {
        access_token: "test-token".to_string(),
        refresh_token: None,
        expires_at: None,
        user: User {
            id: user_id.to_string(),
            email: Some(format!("{}@example.com", user_id)),
        },
    }
}
