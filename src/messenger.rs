use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::SessionError;

pub const DEFAULT_USER_SERVER: &str = "s.whatsapp.net";
pub const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const PAIRING_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimal surface over an authenticated messaging client.
///
/// None of the operations retry. `disconnect` and `close` must be safe to
/// call repeatedly and on every exit path.
#[async_trait]
pub trait MessagingSession: Send + Sync {
    /// True only if a prior pairing run established a device identity.
    fn is_authenticated(&self) -> bool;

    /// Brings the transport up, waiting at most `timeout`.
    async fn connect(&mut self, timeout: Duration) -> Result<(), SessionError>;

    async fn fetch_avatar(&self, phone_number: &str) -> Result<Avatar, SessionError>;

    async fn fetch_user_info(&self, phone_number: &str) -> Result<UserInfo, SessionError>;

    /// Requests a pairing code for `phone_number` and waits for the phone to
    /// accept it.
    async fn pair_by_code(&mut self, phone_number: &str) -> Result<(), SessionError>;

    /// Displays rotating QR codes until one is scanned.
    async fn pair_by_qr(&mut self) -> Result<(), SessionError>;

    async fn disconnect(&mut self);

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Avatar {
    pub bytes: Vec<u8>,
    pub url: String,
    pub mime: &'static str,
}

impl Avatar {
    pub fn new(bytes: Vec<u8>, url: String) -> Self {
        let mime = sniff_image_mime(&bytes);
        Self { bytes, url, mime }
    }

    pub fn extension(&self) -> &'static str {
        match self.mime {
            "image/png" => "png",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "jpg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserInfo {
    pub jid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture_id: Option<String>,
}

/// Strips the formatting people put in phone numbers and returns the digits.
pub fn normalize_phone(raw: &str) -> Result<String, SessionError> {
    let digits: String = raw
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | ' ' | '(' | ')' | '.'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(SessionError::InvalidIdentifier(raw.to_string()));
    }
    Ok(digits)
}

pub fn user_jid(raw: &str) -> Result<String, SessionError> {
    Ok(format!("{}@{}", normalize_phone(raw)?, DEFAULT_USER_SERVER))
}

fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Ready,
    Pending,
    /// The thing being waited on went away and will never become ready.
    Gone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
    Gone,
}

/// Polls `probe` every `interval` until it settles or `timeout` elapses.
///
/// The deadline wins a tie with a tick, so a probe that never becomes ready
/// returns exactly at `timeout`.
pub async fn wait_until<F>(interval: Duration, timeout: Duration, mut probe: F) -> WaitOutcome
where
    F: FnMut() -> Probe + Send,
{
    let deadline = Instant::now() + timeout;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            _ = ticker.tick() => match probe() {
                Probe::Ready => return WaitOutcome::Ready,
                Probe::Gone => return WaitOutcome::Gone,
                Probe::Pending => {}
            },
        }
    }
}

/// Fetches avatar bytes from the CDN location the client handed back.
///
/// A 404 means the picture was removed between lookup and download and is
/// reported as not found. Everything else is a download failure.
pub async fn download_image(
    http: &reqwest::Client,
    url: &str,
    phone_number: &str,
    timeout: Duration,
) -> Result<Vec<u8>, SessionError> {
    debug!("Downloading profile picture for {}", phone_number);
    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| SessionError::AvatarDownload(e.to_string()))?;

    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        warn!("Profile picture URL for {} returned 404", phone_number);
        return Err(SessionError::AvatarNotFound(phone_number.to_string()));
    }
    if !status.is_success() {
        return Err(SessionError::AvatarDownload(format!("HTTP {}", status.as_u16())));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| SessionError::AvatarDownload(format!("failed to read image data: {}", e)))?;
    if bytes.is_empty() {
        return Err(SessionError::AvatarDownload("empty response body".into()));
    }
    Ok(bytes.to_vec())
}
