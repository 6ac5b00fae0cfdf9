use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Failures raised by the session store and the messaging facade.
///
/// Every variant is terminal for a scheduled run. `NotAuthenticated` is the
/// one an operator fixes by running `pair`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to initialize session storage at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("session storage at {0} is locked by another process")]
    Locked(PathBuf),

    #[error("failed to read device record: {0}")]
    DeviceRecord(#[from] plist::Error),

    #[error("WhatsApp client not logged in. Please run the pairing process first.")]
    NotAuthenticated,

    #[error("already logged in")]
    AlreadyPaired,

    #[error("connection timeout after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection cancelled before the transport came up")]
    ConnectCancelled,

    #[error("not connected to WhatsApp")]
    NotConnected,

    #[error("invalid phone number: {0:?}")]
    InvalidIdentifier(String),

    #[error("no profile picture found for {0}")]
    AvatarNotFound(String),

    #[error("failed to download profile picture: {0}")]
    AvatarDownload(String),

    #[error("no user info found for {0}")]
    UserInfoNotFound(String),

    #[error("pairing timeout after {0:?}")]
    PairingTimeout(Duration),

    #[error("pairing failed: {0}")]
    Pairing(String),

    #[error("whatsapp client error: {0}")]
    Client(String),
}

impl SessionError {
    /// True when the target simply has nothing to fetch, as opposed to a
    /// transport or protocol failure.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SessionError::AvatarNotFound(_) | SessionError::UserInfoNotFound(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("failed to send request: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("discord webhook returned error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("failed to marshal payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_names_the_key() {
        let err = ConfigError::Missing("TARGET_PHONE_NUMBER");
        assert_eq!(err.to_string(), "TARGET_PHONE_NUMBER is required");
    }

    #[test]
    fn avatar_not_found_is_distinguishable() {
        let err = SessionError::AvatarNotFound("15551234567".into());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "no profile picture found for 15551234567");

        let err = SessionError::AvatarDownload("HTTP 502".into());
        assert!(!err.is_not_found());
    }

    #[test]
    fn webhook_status_carries_body() {
        let err = WebhookError::Status {
            status: 400,
            body: "{\"message\": \"Cannot send an empty message\"}".into(),
        };
        assert!(err.to_string().contains("400"));
        assert!(err.to_string().contains("Cannot send an empty message"));
    }
}
