//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so the client runs with no configuration.
//! Invalid values are logged and ignored.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};

use charla_shared::constants::{DEFAULT_SESSION_MAX_DAYS, PLATFORM};

use crate::reconcile::DedupKey;

/// Largest accepted display offset, just under one day.
const MAX_OFFSET_MINUTES: i32 = 24 * 60 - 1;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Days a local login stays valid.
    /// Env: `CHARLA_SESSION_MAX_DAYS`
    /// Default: `30`
    pub session_max_days: u32,

    /// How duplicate conversations are grouped.
    /// Env: `CHARLA_DEDUP_KEY` (`title` | `participants` | `disabled`)
    /// Default: `title`
    pub dedup_key: DedupKey,

    /// UTC offset used to render message times (`HH:mm`).
    /// Env: `CHARLA_DISPLAY_UTC_OFFSET_MINUTES`
    /// Default: `-240`
    pub display_offset_minutes: i32,

    /// Env: `CHARLA_NOTIFICATIONS` (true/false)
    /// Default: `true`
    pub notifications_enabled: bool,

    /// Mirror presence writes into the document store.
    /// Env: `CHARLA_PRESENCE_MIRROR` (true/false)
    /// Default: `true`
    pub presence_mirror: bool,

    /// Env: `CHARLA_TOKEN_RETRY_ATTEMPTS`
    /// Default: `3`
    pub token_retry_attempts: u32,

    /// First retry delay; doubles on every further attempt.
    /// Env: `CHARLA_TOKEN_RETRY_BASE_MS`
    /// Default: `2000`
    pub token_retry_base_delay: Duration,

    /// Local database file.
    /// Env: `CHARLA_DB_PATH`
    /// Default: platform data directory.
    pub db_path: Option<PathBuf>,

    /// Env: `CHARLA_APP_VERSION`
    /// Default: the crate version.
    pub app_version: String,

    /// Reported with push tokens.
    pub device_info: String,

    pub platform: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_max_days: DEFAULT_SESSION_MAX_DAYS,
            dedup_key: DedupKey::default(),
            display_offset_minutes: -240,
            notifications_enabled: true,
            presence_mirror: true,
            token_retry_attempts: 3,
            token_retry_base_delay: Duration::from_millis(2_000),
            db_path: None,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            device_info: format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
            platform: PLATFORM.to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = var("CHARLA_SESSION_MAX_DAYS") {
            match val.trim().parse::<u32>() {
                Ok(days) => config.session_max_days = days,
                Err(_) => tracing::warn!(value = %val, "Invalid CHARLA_SESSION_MAX_DAYS, using default"),
            }
        }

        if let Some(val) = var("CHARLA_DEDUP_KEY") {
            match val.parse::<DedupKey>() {
                Ok(key) => config.dedup_key = key,
                Err(e) => tracing::warn!(error = %e, "Invalid CHARLA_DEDUP_KEY, using default"),
            }
        }

        if let Some(val) = var("CHARLA_DISPLAY_UTC_OFFSET_MINUTES") {
            match val.trim().parse::<i32>() {
                Ok(m) if (-MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&m) => {
                    config.display_offset_minutes = m;
                }
                _ => tracing::warn!(
                    value = %val,
                    "Invalid CHARLA_DISPLAY_UTC_OFFSET_MINUTES, using default"
                ),
            }
        }

        if let Some(val) = var("CHARLA_NOTIFICATIONS") {
            config.notifications_enabled = val != "false" && val != "0";
        }

        if let Some(val) = var("CHARLA_PRESENCE_MIRROR") {
            config.presence_mirror = val != "false" && val != "0";
        }

        if let Some(val) = var("CHARLA_TOKEN_RETRY_ATTEMPTS") {
            match val.trim().parse::<u32>() {
                Ok(n) if n > 0 => config.token_retry_attempts = n,
                _ => tracing::warn!(value = %val, "Invalid CHARLA_TOKEN_RETRY_ATTEMPTS, using default"),
            }
        }

        if let Some(val) = var("CHARLA_TOKEN_RETRY_BASE_MS") {
            if let Ok(ms) = val.trim().parse::<u64>() {
                config.token_retry_base_delay = Duration::from_millis(ms);
            }
        }

        if let Some(path) = var("CHARLA_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(version) = var("CHARLA_APP_VERSION") {
            if !version.is_empty() {
                config.app_version = version;
            }
        }

        config
    }

    /// Offset used for message timestamps.
    pub fn display_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.display_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> ClientConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = load(&[]);
        assert_eq!(config.session_max_days, 30);
        assert_eq!(config.dedup_key, DedupKey::Title);
        assert_eq!(config.display_offset().local_minus_utc(), -4 * 3600);
        assert!(config.notifications_enabled);
        assert!(config.presence_mirror);
        assert_eq!(config.token_retry_attempts, 3);
        assert_eq!(config.token_retry_base_delay, Duration::from_secs(2));
        assert!(config.db_path.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("CHARLA_SESSION_MAX_DAYS", "7"),
            ("CHARLA_DEDUP_KEY", "Participants"),
            ("CHARLA_DISPLAY_UTC_OFFSET_MINUTES", "60"),
            ("CHARLA_NOTIFICATIONS", "false"),
            ("CHARLA_PRESENCE_MIRROR", "0"),
            ("CHARLA_TOKEN_RETRY_ATTEMPTS", "5"),
            ("CHARLA_TOKEN_RETRY_BASE_MS", "10"),
            ("CHARLA_DB_PATH", "/tmp/charla.db"),
            ("CHARLA_APP_VERSION", "2.1.0"),
        ]);
        assert_eq!(config.session_max_days, 7);
        assert_eq!(config.dedup_key, DedupKey::Participants);
        assert_eq!(config.display_offset().local_minus_utc(), 3600);
        assert!(!config.notifications_enabled);
        assert!(!config.presence_mirror);
        assert_eq!(config.token_retry_attempts, 5);
        assert_eq!(config.token_retry_base_delay, Duration::from_millis(10));
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/charla.db")));
        assert_eq!(config.app_version, "2.1.0");
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("CHARLA_SESSION_MAX_DAYS", "soon"),
            ("CHARLA_DEDUP_KEY", "color"),
            ("CHARLA_DISPLAY_UTC_OFFSET_MINUTES", "5000"),
            ("CHARLA_TOKEN_RETRY_ATTEMPTS", "0"),
        ]);
        assert_eq!(config.session_max_days, 30);
        assert_eq!(config.dedup_key, DedupKey::Title);
        assert_eq!(config.display_offset_minutes, -240);
        assert_eq!(config.token_retry_attempts, 3);
    }
}
