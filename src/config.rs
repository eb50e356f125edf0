use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Longest duration the `MM:SS` display can show
pub const MAX_DISPLAY_SECS: u32 = 99 * 60 + 59;

/// Hosted backend connection
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: Option<String>,
    #[serde(default = "default_anon_key_env")]
    pub anon_key_env: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_anon_key_env() -> String {
    "MINDFUL_ANON_KEY".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: None,
            anon_key_env: default_anon_key_env(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl BackendConfig {
    /// Resolve the anon key from config or environment
    pub fn resolve_anon_key(&self) -> Option<String> {
        if let Some(key) = &self.anon_key {
            return Some(key.clone());
        }
        std::env::var(&self.anon_key_env).ok().filter(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimerConfig {
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u32,
    #[serde(default = "default_presets")]
    pub presets: Vec<u32>,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_duration_secs() -> u32 {
    1200 // 20 minutes
}

fn default_presets() -> Vec<u32> {
    vec![300, 600, 1200, 2400, 3600]
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: default_duration_secs(),
            presets: default_presets(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JournalConfig {
    #[serde(default = "default_journal_max_chars")]
    pub max_chars: usize,
}

fn default_journal_max_chars() -> usize {
    500
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            max_chars: default_journal_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AchievementsConfig {
    #[serde(default = "default_morning_start")]
    pub morning_start_hour: u32,
    #[serde(default = "default_morning_end")]
    pub morning_end_hour: u32,
    #[serde(default = "default_true")]
    pub auto_unlock: bool,
}

fn default_morning_start() -> u32 {
    5
}
fn default_morning_end() -> u32 {
    12
}
fn default_true() -> bool {
    true
}

impl Default for AchievementsConfig {
    fn default() -> Self {
        Self {
            morning_start_hour: default_morning_start(),
            morning_end_hour: default_morning_end(),
            auto_unlock: default_true(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecentConfig {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    10
}

impl Default for RecentConfig {
    fn default() -> Self {
        Self {
            limit: default_recent_limit(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub timer: TimerConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub achievements: AchievementsConfig,
    #[serde(default)]
    pub recent: RecentConfig,
}

/// Same shape as `Config` but every field optional, so a layer only
/// overrides what it actually sets
#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigLayer {
    #[serde(default)]
    backend: BackendLayer,
    #[serde(default)]
    timer: TimerLayer,
    #[serde(default)]
    journal: JournalLayer,
    #[serde(default)]
    achievements: AchievementsLayer,
    #[serde(default)]
    recent: RecentLayer,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct BackendLayer {
    url: Option<String>,
    anon_key: Option<String>,
    anon_key_env: Option<String>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct TimerLayer {
    default_duration_secs: Option<u32>,
    presets: Option<Vec<u32>>,
    tick_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct JournalLayer {
    max_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct AchievementsLayer {
    morning_start_hour: Option<u32>,
    morning_end_hour: Option<u32>,
    auto_unlock: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RecentLayer {
    limit: Option<usize>,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.mindful/config.local.toml) > project (.mindful/config.toml) > user (~/.mindful/config.toml)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        for path in Self::default_paths() {
            if path.exists() {
                config.merge_file(&path)?;
            }
        }
        Ok(config)
    }

    /// Layer files in the order they are applied
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".mindful").join("config.toml"));
        }
        let project = Path::new(".mindful");
        paths.push(project.join("config.toml"));
        // Should be gitignored
        paths.push(project.join("config.local.toml"));
        paths
    }

    /// Load configuration from a specific path on top of the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        config.merge_file(path)?;
        Ok(config)
    }

    /// Merge a config file into this one (the file takes priority)
    pub fn merge_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        let layer: ConfigLayer = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("{}: {}", path.display(), e))?;
        self.apply(layer);
        tracing::debug!(path = %path.display(), "merged config layer");
        Ok(())
    }

    fn apply(&mut self, layer: ConfigLayer) {
        let b = layer.backend;
        if let Some(url) = b.url {
            self.backend.url = url;
        }
        if b.anon_key.is_some() {
            self.backend.anon_key = b.anon_key;
        }
        if let Some(env) = b.anon_key_env {
            self.backend.anon_key_env = env;
        }
        if let Some(timeout) = b.timeout_ms {
            self.backend.timeout_ms = timeout;
        }

        let t = layer.timer;
        if let Some(d) = t.default_duration_secs {
            self.timer.default_duration_secs = d;
        }
        if let Some(presets) = t.presets {
            self.timer.presets = presets;
        }
        if let Some(ms) = t.tick_interval_ms {
            self.timer.tick_interval_ms = ms;
        }

        if let Some(max) = layer.journal.max_chars {
            self.journal.max_chars = max;
        }

        let a = layer.achievements;
        if let Some(h) = a.morning_start_hour {
            self.achievements.morning_start_hour = h;
        }
        if let Some(h) = a.morning_end_hour {
            self.achievements.morning_end_hour = h;
        }
        if let Some(auto) = a.auto_unlock {
            self.achievements.auto_unlock = auto;
        }

        if let Some(limit) = layer.recent.limit {
            self.recent.limit = limit;
        }
    }

    /// Apply command-line overrides for the backend connection
    pub fn apply_cli(&mut self, url: Option<&str>, anon_key: Option<&str>) {
        if let Some(url) = url {
            self.backend.url = url.to_string();
        }
        if let Some(key) = anon_key {
            self.backend.anon_key = Some(key.to_string());
        }
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let url = self.backend.url.trim();
        if url.is_empty() {
            errors.push(ValidationError {
                field: "backend.url".to_string(),
                message: "Backend URL is not set (use --url, MINDFUL_URL or [backend] url)"
                    .to_string(),
            });
        } else if !(url.starts_with("http://") || url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "backend.url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", url),
            });
        }

        let d = self.timer.default_duration_secs;
        if d == 0 || d > MAX_DISPLAY_SECS {
            errors.push(ValidationError {
                field: "timer.default_duration_secs".to_string(),
                message: format!("Must be between 1 and {}, got {}", MAX_DISPLAY_SECS, d),
            });
        }

        for (i, preset) in self.timer.presets.iter().enumerate() {
            if *preset == 0 || *preset > MAX_DISPLAY_SECS {
                errors.push(ValidationError {
                    field: format!("timer.presets[{}]", i),
                    message: format!("Must be between 1 and {}, got {}", MAX_DISPLAY_SECS, preset),
                });
            }
        }

        if self.timer.tick_interval_ms == 0 {
            errors.push(ValidationError {
                field: "timer.tick_interval_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.journal.max_chars == 0 {
            errors.push(ValidationError {
                field: "journal.max_chars".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        let a = &self.achievements;
        if !(a.morning_start_hour < a.morning_end_hour && a.morning_end_hour <= 24) {
            errors.push(ValidationError {
                field: "achievements.morning_start_hour".to_string(),
                message: format!(
                    "Morning window must satisfy start < end <= 24, got {}..{}",
                    a.morning_start_hour, a.morning_end_hour
                ),
            });
        }

        if self.recent.limit == 0 {
            errors.push(ValidationError {
                field: "recent.limit".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut config = Config::default();
        config.backend.url = "https://project.supabase.co".to_string();
        config
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timer.default_duration_secs, 1200);
        assert_eq!(config.timer.presets, vec![300, 600, 1200, 2400, 3600]);
        assert_eq!(config.journal.max_chars, 500);
        assert_eq!(config.recent.limit, 10);
        assert_eq!(config.achievements.morning_start_hour, 5);
        assert_eq!(config.achievements.morning_end_hour, 12);
        assert_eq!(config.backend.anon_key_env, "MINDFUL_ANON_KEY");
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_missing_url() {
        let errors = Config::default().validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "backend.url");
    }

    #[test]
    fn test_validate_non_http_url() {
        let mut config = valid();
        config.backend.url = "ftp://example.com".to_string();
        let errors = config.validate().unwrap_err();
        assert!(errors[0].message.contains("http(s)"));
    }

    #[test]
    fn test_validate_durations() {
        let mut config = valid();
        config.timer.default_duration_secs = 6000;
        config.timer.presets = vec![300, 0];
        config.timer.tick_interval_ms = 0;
        let errors = config.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "timer.default_duration_secs",
                "timer.presets[1]",
                "timer.tick_interval_ms"
            ]
        );
    }

    #[test]
    fn test_validate_morning_window() {
        let mut config = valid();
        config.achievements.morning_start_hour = 12;
        config.achievements.morning_end_hour = 5;
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("start < end"));
    }

    #[test]
    fn test_layers_only_override_what_they_set() {
        let dir = tempfile::tempdir().unwrap();
        let user = dir.path().join("user.toml");
        let local = dir.path().join("local.toml");
        std::fs::write(
            &user,
            r#"
[backend]
url = "https://user.example.co"
timeout_ms = 5000

[timer]
presets = [600, 900]
"#,
        )
        .unwrap();
        std::fs::write(
            &local,
            r#"
[backend]
url = "https://local.example.co"

[journal]
max_chars = 280
"#,
        )
        .unwrap();

        let mut config = Config::load_from(&user).unwrap();
        config.merge_file(&local).unwrap();

        assert_eq!(config.backend.url, "https://local.example.co");
        assert_eq!(config.backend.timeout_ms, 5000);
        assert_eq!(config.timer.presets, vec![600, 900]);
        assert_eq!(config.timer.default_duration_secs, 1200);
        assert_eq!(config.journal.max_chars, 280);
    }

    #[test]
    fn test_bad_toml_names_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[timer\n").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = valid();
        config.apply_cli(Some("http://localhost:54321"), Some("anon"));
        assert_eq!(config.backend.url, "http://localhost:54321");
        assert_eq!(config.backend.resolve_anon_key().as_deref(), Some("anon"));
    }
}
