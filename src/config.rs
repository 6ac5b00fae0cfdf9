use std::path::PathBuf;
use std::time::Duration;

use log::debug;

use crate::error::ConfigError;

pub const DEFAULT_SESSION_PATH: &str = "./sessions/";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Where the session lives and how long its network operations may take.
/// Everything the pairing path needs, with no required keys.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub path: PathBuf,
    pub connect_timeout: Duration,
    pub http_timeout: Duration,
    pub pairing_timeout: Duration,
}

impl SessionSettings {
    pub fn load() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);
        let secs = |key: &str, default: u64| {
            Duration::from_secs(get(key).and_then(|v| v.parse().ok()).unwrap_or(default))
        };

        Self {
            path: PathBuf::from(
                get("SESSION_FILE_PATH").unwrap_or_else(|| DEFAULT_SESSION_PATH.to_string()),
            ),
            connect_timeout: secs("CONNECT_TIMEOUT_SECS", 60),
            http_timeout: secs("HTTP_TIMEOUT_SECS", 30),
            pairing_timeout: secs("PAIRING_TIMEOUT_SECS", 300),
        }
    }
}

/// Runtime configuration for the scheduled run, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub target_phone_number: String,
    pub discord_webhook_url: String,
    pub session: SessionSettings,

    // Google Cloud (optional, unused by the fetch flow)
    pub google_cloud_project: Option<String>,
    pub google_cloud_bucket: Option<String>,

    pub log_level: String,
    pub settle_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let target_phone_number =
            get("TARGET_PHONE_NUMBER").ok_or(ConfigError::Missing("TARGET_PHONE_NUMBER"))?;
        let discord_webhook_url =
            get("DISCORD_WEBHOOK_URL").ok_or(ConfigError::Missing("DISCORD_WEBHOOK_URL"))?;

        let google_cloud_project = get("GOOGLE_CLOUD_PROJECT");
        let google_cloud_bucket = get("GOOGLE_CLOUD_BUCKET");
        if google_cloud_project.is_some() || google_cloud_bucket.is_some() {
            debug!(
                "Google Cloud coordinates present (project={:?}, bucket={:?})",
                google_cloud_project, google_cloud_bucket
            );
        }

        let settle_delay = Duration::from_secs(
            get("SETTLE_DELAY_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        );

        Ok(Self {
            target_phone_number,
            discord_webhook_url,
            session: SessionSettings::from_lookup(&lookup),
            google_cloud_project,
            google_cloud_bucket,
            log_level: log_level(get("LOG_LEVEL")),
            settle_delay,
        })
    }
}

/// Read ahead of everything else so configuration errors get logged too.
pub fn log_level_from_env() -> String {
    log_level(std::env::var("LOG_LEVEL").ok().and_then(non_empty))
}

fn log_level(value: Option<String>) -> String {
    value.unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn loads_required_and_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("TARGET_PHONE_NUMBER", "15551234567"),
            ("DISCORD_WEBHOOK_URL", "https://discord.test/api/webhooks/1/abc"),
        ]))
        .unwrap();

        assert_eq!(config.target_phone_number, "15551234567");
        assert_eq!(config.session.path, PathBuf::from("./sessions/"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.session.connect_timeout, Duration::from_secs(60));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.session.http_timeout, Duration::from_secs(30));
        assert_eq!(config.session.pairing_timeout, Duration::from_secs(300));
        assert!(config.google_cloud_project.is_none());
        assert!(config.google_cloud_bucket.is_none());
    }

    #[test]
    fn missing_target_is_rejected() {
        let err = Config::from_lookup(lookup(&[(
            "DISCORD_WEBHOOK_URL",
            "https://discord.test/api/webhooks/1/abc",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TARGET_PHONE_NUMBER")));
    }

    #[test]
    fn missing_webhook_is_rejected() {
        let err =
            Config::from_lookup(lookup(&[("TARGET_PHONE_NUMBER", "15551234567")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DISCORD_WEBHOOK_URL")));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let err = Config::from_lookup(lookup(&[
            ("TARGET_PHONE_NUMBER", "   "),
            ("DISCORD_WEBHOOK_URL", "https://discord.test/api/webhooks/1/abc"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("TARGET_PHONE_NUMBER")));
    }

    #[test]
    fn optional_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("TARGET_PHONE_NUMBER", "15551234567"),
            ("DISCORD_WEBHOOK_URL", "https://discord.test/api/webhooks/1/abc"),
            ("SESSION_FILE_PATH", "/var/lib/relay"),
            ("LOG_LEVEL", "debug"),
            ("GOOGLE_CLOUD_PROJECT", "proj"),
            ("GOOGLE_CLOUD_BUCKET", "bucket"),
            ("CONNECT_TIMEOUT_SECS", "15"),
            ("SETTLE_DELAY_SECS", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.session.path, PathBuf::from("/var/lib/relay"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.google_cloud_project.as_deref(), Some("proj"));
        assert_eq!(config.google_cloud_bucket.as_deref(), Some("bucket"));
        assert_eq!(config.session.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
    }

    #[test]
    fn session_settings_need_no_required_keys() {
        let settings = SessionSettings::from_lookup(lookup(&[("PAIRING_TIMEOUT_SECS", "120")]));
        assert_eq!(settings.path, PathBuf::from(DEFAULT_SESSION_PATH));
        assert_eq!(settings.pairing_timeout, Duration::from_secs(120));
        assert_eq!(settings.connect_timeout, Duration::from_secs(60));
    }
}
