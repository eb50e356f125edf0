//! Profile details, password changes and avatar uploads.

use crate::auth::{validate_password, AuthSession, IdentityProvider};
use crate::error::{MindfulError, Result};
use crate::models::{Profile, ProfileUpdate};
use crate::store::{ObjectStore, ProfileStore};
use chrono::{DateTime, Utc};
use std::path::Path;

pub const AVATAR_BUCKET: &str = "avatars";

/// Editable profile fields, as named on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Username,
    FullName,
}

impl ProfileField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "username" => Some(Self::Username),
            "full_name" | "name" => Some(Self::FullName),
            _ => None,
        }
    }
}

/// The user's profile, or an empty one if no row exists yet
pub fn load<S>(store: &S, auth: Option<&AuthSession>) -> Result<Profile>
where
    S: ProfileStore + ?Sized,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
    let profile = store.profile(auth)?.unwrap_or_else(|| Profile {
        id: auth.user_id().to_string(),
        ..Default::default()
    });
    Ok(profile)
}

pub fn update_field<S>(
    store: &S,
    auth: Option<&AuthSession>,
    field: ProfileField,
    value: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    S: ProfileStore + ?Sized,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
    let value = value.trim();
    if value.is_empty() {
        return Err(MindfulError::validation("Value cannot be empty"));
    }
    let mut update = ProfileUpdate {
        updated_at: Some(now),
        ..Default::default()
    };
    match field {
        ProfileField::Username => {
            if value.chars().any(char::is_whitespace) {
                return Err(MindfulError::validation("Username cannot contain spaces"));
            }
            update.username = Some(value.to_string());
        }
        ProfileField::FullName => update.full_name = Some(value.to_string()),
    }
    store.update_profile(auth, &update)?;
    tracing::info!(field = ?field, "profile updated");
    Ok(())
}

/// A new password with its confirmation
#[derive(Debug, Clone)]
pub struct PasswordChange {
    pub new_password: String,
    pub confirm: String,
}

impl PasswordChange {
    pub fn validate(&self) -> Result<()> {
        if self.new_password != self.confirm {
            return Err(MindfulError::validation("Passwords do not match"));
        }
        validate_password(&self.new_password)
    }
}

pub fn change_password<P>(provider: &P, auth: Option<&AuthSession>, change: &PasswordChange) -> Result<()>
where
    P: IdentityProvider + ?Sized,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
    change.validate()?;
    provider.update_password(auth, &change.new_password)?;
    tracing::info!("password changed");
    Ok(())
}

/// Extension and MIME type for an avatar image, judged by file name
pub fn avatar_format(path: &Path) -> Result<(&'static str, &'static str)> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok(("png", "image/png")),
        "jpg" | "jpeg" => Ok(("jpg", "image/jpeg")),
        "gif" => Ok(("gif", "image/gif")),
        "webp" => Ok(("webp", "image/webp")),
        _ => Err(MindfulError::validation(format!(
            "{} is not a supported image (png, jpg, gif, webp)",
            path.display()
        ))),
    }
}

/// `<user-id>/avatar.<ext>`; re-uploading replaces the previous image
pub fn avatar_path(user_id: &str, ext: &str) -> String {
    format!("{}/avatar.{}", user_id, ext)
}

/// Upload an image and point the profile at it. Returns the public URL.
pub fn upload_avatar<S>(store: &S, auth: Option<&AuthSession>, file: &Path, now: DateTime<Utc>) -> Result<String>
where
    S: ProfileStore + ObjectStore + ?Sized,
{
    let auth = auth.ok_or(MindfulError::NotAuthenticated)?;
    let (ext, content_type) = avatar_format(file)?;
    let bytes = std::fs::read(file)
        .map_err(|e| MindfulError::io(format!("reading {}", file.display()), e))?;

    let path = avatar_path(auth.user_id(), ext);
    store.upload(auth, AVATAR_BUCKET, &path, content_type, &bytes)?;
    let url = store.public_url(AVATAR_BUCKET, &path);

    store.update_profile(
        auth,
        &ProfileUpdate {
            avatar_url: Some(url.clone()),
            updated_at: Some(now),
            ..Default::default()
        },
    )?;
    tracing::info!(bytes = bytes.len(), %path, "avatar uploaded");
    Ok(url)
}
