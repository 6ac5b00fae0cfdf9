use std::io::{BufRead, Write};
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Local;
use log::{error, info, warn};

use crate::config::Config;
use crate::error::SessionError;
use crate::messenger::{normalize_phone, MessagingSession, UserInfo};
use crate::session::PairingMethod;
use crate::webhook::WebhookClient;

#[derive(Clone, Copy, Debug)]
pub struct RunOptions {
    pub connect_timeout: Duration,
    /// Pause after connecting. The client exposes no readiness signal beyond
    /// the connected flag.
    pub settle_delay: Duration,
    /// Pause after the success notice before tearing the transport down.
    pub teardown_delay: Duration,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect_timeout: config.session.connect_timeout,
            settle_delay: config.settle_delay,
            teardown_delay: config.settle_delay,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Delivered { filename: String },
    Failed { title: &'static str, reason: String },
}

/// One scheduled fetch-and-deliver pass.
///
/// Every failure is reported to the webhook and ends the run. Once the
/// session has been opened it is disconnected and closed on every path.
pub async fn run_once<F>(
    target: &str,
    open: F,
    sink: &WebhookClient,
    options: RunOptions,
) -> Outcome
where
    F: FnOnce() -> Result<Box<dyn MessagingSession>, SessionError>,
{
    info!("Starting WhatsApp Profile Fetcher for: {}", target);

    let mut session = match open() {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create WhatsApp client: {}", e);
            return report_failure(
                sink,
                "WhatsApp Client Error",
                format!("Failed to create WhatsApp client: {}", e),
            )
            .await;
        }
    };

    let outcome = fetch_and_deliver(target, session.as_mut(), sink, options).await;

    session.disconnect().await;
    if let Err(e) = session.close().await {
        warn!("Failed to close WhatsApp session: {}", e);
    }

    if let Outcome::Delivered { .. } = outcome {
        info!("Task completed successfully!");
    }
    outcome
}

async fn fetch_and_deliver(
    target: &str,
    session: &mut dyn MessagingSession,
    sink: &WebhookClient,
    options: RunOptions,
) -> Outcome {
    if !session.is_authenticated() {
        let reason = SessionError::NotAuthenticated.to_string();
        error!("{}", reason);
        return report_failure(sink, "Authentication Required", reason).await;
    }

    info!("Connecting to WhatsApp...");
    match session.connect(options.connect_timeout).await {
        Ok(()) => {}
        Err(SessionError::NotAuthenticated) => {
            let reason = SessionError::NotAuthenticated.to_string();
            error!("{}", reason);
            return report_failure(sink, "Authentication Required", reason).await;
        }
        Err(e) => {
            error!("Failed to connect to WhatsApp: {}", e);
            return report_failure(
                sink,
                "Connection Error",
                format!("Failed to connect to WhatsApp: {}", e),
            )
            .await;
        }
    }

    tokio::time::sleep(options.settle_delay).await;

    info!("Fetching profile picture for: {}", target);
    let avatar = match session.fetch_avatar(target).await {
        Ok(avatar) => avatar,
        Err(e) => {
            if e.is_not_found() {
                warn!("{} has no profile picture", target);
            } else {
                error!("Failed to fetch profile picture: {}", e);
            }
            return report_failure(
                sink,
                "Profile Picture Error",
                format!("Failed to fetch profile picture for {}: {}", target, e),
            )
            .await;
        }
    };

    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let filename = profile_filename(target, &stamp, avatar.extension());

    info!("Sending profile picture to Discord...");
    if let Err(e) = sink
        .send_image(avatar.bytes, &filename, avatar.mime, target)
        .await
    {
        error!("Failed to send image to Discord: {}", e);
        return report_failure(
            sink,
            "Discord Error",
            format!("Failed to send image to Discord: {}", e),
        )
        .await;
    }

    info!("Profile picture sent successfully!");
    if let Err(e) = sink
        .send_success(
            "Profile Picture Fetched",
            &format!("Successfully fetched and sent profile picture for {}", target),
        )
        .await
    {
        warn!("Failed to send success message to Discord: {}", e);
    }

    tokio::time::sleep(options.teardown_delay).await;
    Outcome::Delivered { filename }
}

/// Best-effort error notice. If the webhook itself fails the failure is only
/// logged.
async fn report_failure(sink: &WebhookClient, title: &'static str, reason: String) -> Outcome {
    if let Err(e) = sink.send_error(title, &reason).await {
        error!("Failed to send error message to Discord: {}", e);
    }
    Outcome::Failed { title, reason }
}

fn profile_filename(target: &str, stamp: &str, extension: &str) -> String {
    let safe: String = target.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    format!("profile_{}_{}.{}", safe, stamp, extension)
}

/// Interactive pairing. Returns `false` when the store was already paired.
///
/// `method` and `phone` skip the corresponding prompts when given.
pub async fn run_pairing<R, W>(
    session: &mut dyn MessagingSession,
    mut input: R,
    output: &mut W,
    method: Option<PairingMethod>,
    phone: Option<String>,
) -> anyhow::Result<bool>
where
    R: BufRead,
    W: Write,
{
    if session.is_authenticated() {
        info!("Already logged in to WhatsApp");
        return Ok(false);
    }

    let method = match method {
        Some(method) => method,
        None => {
            writeln!(output, "Choose pairing method:")?;
            writeln!(output, "1. QR Code")?;
            writeln!(output, "2. Phone Number")?;
            let choice = prompt(&mut input, output, "Enter choice (1 or 2): ")?;
            match choice.as_str() {
                "1" => PairingMethod::Qr,
                "2" => PairingMethod::Code,
                other => bail!("Invalid choice: {}", other),
            }
        }
    };

    match method {
        PairingMethod::Qr => {
            session
                .pair_by_qr()
                .await
                .context("Failed to pair with QR code")?;
        }
        PairingMethod::Code => {
            let raw = match phone {
                Some(phone) => phone,
                None => prompt(
                    &mut input,
                    output,
                    "Enter your phone number (with country code, e.g., +1234567890): ",
                )?,
            };
            let phone = normalize_phone(&raw)?;
            session
                .pair_by_code(&phone)
                .await
                .context("Failed to pair with phone number")?;
        }
    }

    info!("Pairing completed successfully!");
    Ok(true)
}

fn prompt<R: BufRead, W: Write>(input: &mut R, output: &mut W, text: &str) -> anyhow::Result<String> {
    write!(output, "{}", text)?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Connects and reads the target's account metadata.
pub async fn lookup_user(
    target: &str,
    session: &mut dyn MessagingSession,
    connect_timeout: Duration,
) -> Result<UserInfo, SessionError> {
    if !session.is_authenticated() {
        return Err(SessionError::NotAuthenticated);
    }
    session.connect(connect_timeout).await?;
    session.fetch_user_info(target).await
}
