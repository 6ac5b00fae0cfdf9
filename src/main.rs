mod config;
mod error;
mod messenger;
mod runner;
mod session;
mod types;
mod webhook;
mod whatsapp;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use log::{debug, error, info};

use config::{Config, SessionSettings};
use error::SessionError;
use messenger::MessagingSession;
use runner::{Outcome, RunOptions};
use session::{PairingMethod, SessionStore};
use webhook::WebhookClient;

#[derive(Parser)]
#[command(
    name = "profile-relay",
    version,
    about = "Fetch a WhatsApp profile picture and relay it to a Discord webhook"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the target's profile picture and post it to the webhook (default)
    Run,
    /// Link this machine as a WhatsApp device
    Pair {
        #[arg(long, value_enum)]
        method: Option<MethodArg>,
        /// Phone number for code pairing, with country code
        #[arg(long)]
        phone: Option<String>,
    },
    /// Print account metadata for a number as JSON
    Info {
        /// Defaults to TARGET_PHONE_NUMBER
        number: Option<String>,
    },
    /// Show whether the session store holds a paired device
    Status,
    /// Forget the paired device and its client database
    Logout,
}

#[derive(Clone, Copy, ValueEnum)]
enum MethodArg {
    Qr,
    Code,
}

impl From<MethodArg> for PairingMethod {
    fn from(arg: MethodArg) -> Self {
        match arg {
            MethodArg::Qr => PairingMethod::Qr,
            MethodArg::Code => PairingMethod::Code,
        }
    }
}

fn init_logging() {
    let mut builder = pretty_env_logger::formatted_timed_builder();
    builder.parse_filters(&format!("{},whatsapp_rust=warn", config::log_level_from_env()));
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

fn open_session(settings: &SessionSettings) -> Result<Box<dyn MessagingSession>, SessionError> {
    let options = whatsapp::BackendOptions {
        http_timeout: settings.http_timeout,
        pairing_timeout: settings.pairing_timeout,
    };
    Ok(Box::new(whatsapp::WhatsAppSession::open(&settings.path, options)?))
}

async fn run() -> anyhow::Result<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    debug!(
        "Session path {}, log level {}, gcloud project {:?}, bucket {:?}",
        config.session.path.display(),
        config.log_level,
        config.google_cloud_project,
        config.google_cloud_bucket
    );

    let sink = WebhookClient::with_timeout(&config.discord_webhook_url, config.session.http_timeout);
    let outcome = runner::run_once(
        &config.target_phone_number,
        || open_session(&config.session),
        &sink,
        RunOptions::from_config(&config),
    )
    .await;

    match outcome {
        Outcome::Delivered { filename } => info!("Delivered {}", filename),
        Outcome::Failed { title, reason } => {
            info!("Run finished with failure ({}): {}", title, reason)
        }
    }
    Ok(())
}

async fn pair(method: Option<MethodArg>, phone: Option<String>) -> anyhow::Result<()> {
    let settings = SessionSettings::load();
    let mut session = open_session(&settings).context("Failed to create WhatsApp client")?;

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let result = runner::run_pairing(
        session.as_mut(),
        stdin.lock(),
        &mut stdout,
        method.map(Into::into),
        phone,
    )
    .await;

    session.disconnect().await;
    session.close().await?;

    if result? {
        println!("Pairing completed successfully!");
    } else {
        println!("Already logged in to WhatsApp");
    }
    Ok(())
}

async fn show_info(number: Option<String>) -> anyhow::Result<()> {
    let target = number
        .or_else(|| std::env::var("TARGET_PHONE_NUMBER").ok())
        .context("pass a number or set TARGET_PHONE_NUMBER")?;
    let settings = SessionSettings::load();
    let mut session = open_session(&settings).context("Failed to create WhatsApp client")?;

    let result = runner::lookup_user(&target, session.as_mut(), settings.connect_timeout).await;

    session.disconnect().await;
    session.close().await?;

    let info = result.with_context(|| format!("Failed to get user info for {}", target))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn show_status() -> anyhow::Result<()> {
    let settings = SessionSettings::load();
    let store = SessionStore::open(&settings.path)?;
    match store.device() {
        Some(device) => println!(
            "Paired as {} via {:?} at {}",
            device.jid,
            device.method,
            device.paired_at.to_rfc3339()
        ),
        None => println!(
            "No paired device in {}. Run `profile-relay pair` first.",
            store.root().display()
        ),
    }
    Ok(())
}

fn logout() -> anyhow::Result<()> {
    let settings = SessionSettings::load();
    let mut store = SessionStore::open(&settings.path)?;
    store.forget()?;
    println!("Removed paired device from {}", store.root().display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Pair { method, phone } => pair(method, phone).await,
        Command::Info { number } => show_info(number).await,
        Command::Status => show_status(),
        Command::Logout => logout(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["profile-relay"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn pair_accepts_method_and_phone() {
        let cli =
            Cli::try_parse_from(["profile-relay", "pair", "--method", "code", "--phone", "+15551234567"])
                .unwrap();
        match cli.command {
            Some(Command::Pair { method, phone }) => {
                assert!(matches!(method, Some(MethodArg::Code)));
                assert_eq!(phone.as_deref(), Some("+15551234567"));
            }
            _ => panic!("expected pair"),
        }
    }

    #[test]
    fn opens_unpaired_session_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SessionSettings {
            path: dir.path().join("sessions"),
            connect_timeout: Duration::from_secs(1),
            http_timeout: Duration::from_secs(1),
            pairing_timeout: Duration::from_secs(1),
        };

        let session = open_session(&settings).unwrap();
        assert!(!session.is_authenticated());
        assert!(settings.path.join("session.lock").exists());
    }
}
