use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use whatsapp_rust::bot::Bot;
use whatsapp_rust::client::Client;
use whatsapp_rust::pair_code::PairCodeOptions;
use whatsapp_rust::store::SqliteStore;
use whatsapp_rust::types::events::Event;
use whatsapp_rust::Jid;
use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
use whatsapp_rust_ureq_http_client::UreqHttpClient;

use crate::error::SessionError;
use crate::messenger::{
    download_image, normalize_phone, user_jid, wait_until, Avatar, MessagingSession, Probe,
    UserInfo, WaitOutcome, CONNECT_POLL_INTERVAL, PAIRING_POLL_INTERVAL,
};
use crate::session::{PairingMethod, SessionStore};

#[derive(Clone, Copy, Debug)]
pub struct BackendOptions {
    pub http_timeout: Duration,
    pub pairing_timeout: Duration,
}

/// State shared between the facade and the client's event callback.
#[derive(Default)]
struct EventState {
    client: Mutex<Option<Arc<Client>>>,
    connected: AtomicBool,
    logged_out: AtomicBool,
    paired_jid: Mutex<Option<String>>,
    pair_error: Mutex<Option<String>>,
}

impl EventState {
    fn handle(&self, event: Event, client: Arc<Client>) {
        self.attach(client);

        match event {
            Event::Connected(_) => {
                info!("WhatsApp connected");
                self.connected.store(true, Ordering::SeqCst);
            }
            Event::Disconnected(_) => {
                warn!("WhatsApp disconnected");
                self.connected.store(false, Ordering::SeqCst);
            }
            Event::LoggedOut(_) => {
                warn!("WhatsApp device was unlinked, pairing is required again");
                self.mark_logged_out();
            }
            Event::PairingQrCode { code, .. } => render_qr(&code),
            Event::PairingCode { code, timeout } => {
                println!("Pairing code: {}", code);
                println!("Please enter this code in WhatsApp on your phone (expires in {:?})", timeout);
            }
            Event::PairSuccess(pair_success) => {
                info!("Successfully paired with WhatsApp");
                if let Ok(mut guard) = self.paired_jid.lock() {
                    *guard = Some(pair_success.id.to_string());
                }
            }
            Event::PairError(pair_error) => {
                error!("WhatsApp pairing failed: {:?}", pair_error);
                if let Ok(mut guard) = self.pair_error.lock() {
                    *guard = Some(format!("{:?}", pair_error));
                }
            }
            _ => debug!("WhatsApp event (not handled): {:?}", std::mem::discriminant(&event)),
        }
    }

    fn attach(&self, client: Arc<Client>) {
        if let Ok(mut guard) = self.client.lock() {
            if guard.is_none() {
                *guard = Some(client);
            }
        }
    }

    fn take_client(&self) -> Option<Arc<Client>> {
        self.client.lock().ok().and_then(|mut guard| guard.take())
    }

    fn mark_logged_out(&self) {
        self.logged_out.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    /// Probe for the connect wait. A logout ends the wait as `Gone`.
    fn connect_probe(&self, task_finished: bool) -> Probe {
        if self.is_connected() {
            Probe::Ready
        } else if self.is_logged_out() || task_finished {
            Probe::Gone
        } else {
            Probe::Pending
        }
    }

    fn client(&self) -> Option<Arc<Client>> {
        self.client.lock().ok().and_then(|guard| guard.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn paired_jid(&self) -> Option<String> {
        self.paired_jid.lock().ok().and_then(|guard| guard.clone())
    }

    fn pair_error(&self) -> Option<String> {
        self.pair_error.lock().ok().and_then(|guard| guard.clone())
    }
}

/// `MessagingSession` backed by the whatsapp-rust client and its SQLite store.
pub struct WhatsAppSession {
    store: SessionStore,
    options: BackendOptions,
    http: reqwest::Client,
    state: Arc<EventState>,
    bot_task: Option<JoinHandle<()>>,
}

impl WhatsAppSession {
    pub fn open(path: &Path, options: BackendOptions) -> Result<Self, SessionError> {
        let store = SessionStore::open(path)?;
        info!("Opened WhatsApp session store at {}", store.root().display());
        Ok(Self {
            store,
            options,
            http: reqwest::Client::new(),
            state: Arc::new(EventState::default()),
            bot_task: None,
        })
    }

    /// Builds the client and starts it in the background. With `pair_phone`
    /// set the client asks for a pairing code instead of showing QR codes.
    async fn start_client(&mut self, pair_phone: Option<String>) -> Result<(), SessionError> {
        let db_path = self.store.db_path().to_string_lossy().to_string();
        debug!("WhatsApp session database path: {}", db_path);

        let backend = SqliteStore::new(&db_path)
            .await
            .map_err(|e| SessionError::Client(format!("failed to create store: {}", e)))?;

        let mut builder = Bot::builder()
            .with_backend(Arc::new(backend))
            .with_transport_factory(TokioWebSocketTransportFactory::new())
            .with_http_client(UreqHttpClient::new());
        if let Some(phone_number) = pair_phone {
            builder = builder.with_pair_code(PairCodeOptions {
                phone_number,
                ..Default::default()
            });
        }

        let state = self.state.clone();
        let mut bot = builder
            .on_event(move |event, client| {
                let state = state.clone();
                async move { state.handle(event, client) }
            })
            .build()
            .await
            .map_err(|e| SessionError::Client(format!("failed to build client: {}", e)))?;
        self.state.attach(bot.client());

        let handle = bot
            .run()
            .await
            .map_err(|e| SessionError::Client(format!("failed to connect: {}", e)))?;
        self.bot_task = Some(handle);
        Ok(())
    }

    /// Drops local pairing state after the server unlinked this device.
    fn forget_device(&mut self) -> Result<(), SessionError> {
        if self.store.is_paired() {
            warn!(
                "Removing local pairing in {} after logout",
                self.store.root().display()
            );
        }
        self.store.forget()
    }

    fn connected_client(&self) -> Result<Arc<Client>, SessionError> {
        if !self.state.is_connected() {
            return Err(SessionError::NotConnected);
        }
        self.state.client().ok_or(SessionError::NotConnected)
    }

    async fn wait_for_pairing(&mut self, method: PairingMethod) -> Result<(), SessionError> {
        let timeout = self.options.pairing_timeout;
        let state = self.state.clone();
        let task = self.bot_task.as_ref().map(|t| t.abort_handle());

        let outcome = wait_until(PAIRING_POLL_INTERVAL, timeout, || {
            if state.paired_jid().is_some() {
                Probe::Ready
            } else if state.pair_error().is_some() || task.as_ref().map_or(true, |t| t.is_finished())
            {
                Probe::Gone
            } else {
                Probe::Pending
            }
        })
        .await;

        match outcome {
            WaitOutcome::Ready => {
                let jid = self.state.paired_jid().unwrap_or_default();
                self.store.record_pairing(&jid, method)?;
                Ok(())
            }
            WaitOutcome::TimedOut => Err(SessionError::PairingTimeout(timeout)),
            WaitOutcome::Gone => Err(SessionError::Pairing(
                self.state
                    .pair_error()
                    .unwrap_or_else(|| "client stopped before pairing completed".to_string()),
            )),
        }
    }
}

#[async_trait]
impl MessagingSession for WhatsAppSession {
    fn is_authenticated(&self) -> bool {
        self.store.is_paired()
    }

    async fn connect(&mut self, timeout: Duration) -> Result<(), SessionError> {
        if self.state.is_logged_out() {
            self.forget_device()?;
        }
        if !self.is_authenticated() {
            return Err(SessionError::NotAuthenticated);
        }
        if self.state.is_connected() {
            return Ok(());
        }

        self.start_client(None).await?;

        let state = self.state.clone();
        let task = self.bot_task.as_ref().map(|t| t.abort_handle());
        let outcome = wait_until(CONNECT_POLL_INTERVAL, timeout, || {
            state.connect_probe(task.as_ref().map_or(true, |t| t.is_finished()))
        })
        .await;

        match outcome {
            WaitOutcome::Ready => {
                info!("Successfully connected to WhatsApp");
                Ok(())
            }
            WaitOutcome::TimedOut => Err(SessionError::ConnectTimeout(timeout)),
            WaitOutcome::Gone if self.state.is_logged_out() => {
                self.forget_device()?;
                Err(SessionError::NotAuthenticated)
            }
            WaitOutcome::Gone => Err(SessionError::ConnectCancelled),
        }
    }

    async fn fetch_avatar(&self, phone_number: &str) -> Result<Avatar, SessionError> {
        let client = self.connected_client()?;
        let jid = parse_jid(phone_number)?;

        let picture = client
            .contacts()
            .get_profile_picture(&jid, false)
            .await
            .map_err(|e| SessionError::Client(format!("failed to get profile picture info: {}", e)))?
            .ok_or_else(|| SessionError::AvatarNotFound(phone_number.to_string()))?;

        let bytes =
            download_image(&self.http, &picture.url, phone_number, self.options.http_timeout)
                .await?;
        info!(
            "Fetched profile picture for {} ({} bytes)",
            phone_number,
            bytes.len()
        );
        Ok(Avatar::new(bytes, picture.url))
    }

    async fn fetch_user_info(&self, phone_number: &str) -> Result<UserInfo, SessionError> {
        let client = self.connected_client()?;
        let jid = parse_jid(phone_number)?;

        let infos = client
            .contacts()
            .get_user_info(&[jid.clone()])
            .await
            .map_err(|e| SessionError::Client(format!("failed to get user info: {}", e)))?;
        let info = infos
            .get(&jid)
            .ok_or_else(|| SessionError::UserInfoNotFound(phone_number.to_string()))?;

        Ok(UserInfo {
            jid: jid.to_string(),
            status: info.status.clone(),
            picture_id: info.picture_id.as_ref().map(|id| id.to_string()),
        })
    }

    async fn pair_by_code(&mut self, phone_number: &str) -> Result<(), SessionError> {
        if self.is_authenticated() {
            return Err(SessionError::AlreadyPaired);
        }
        let phone_number = normalize_phone(phone_number)?;
        info!("Starting phone number pairing for: {}", phone_number);

        self.start_client(Some(phone_number)).await?;
        self.wait_for_pairing(PairingMethod::Code).await
    }

    async fn pair_by_qr(&mut self) -> Result<(), SessionError> {
        if self.is_authenticated() {
            return Err(SessionError::AlreadyPaired);
        }
        info!("Starting QR code pairing...");

        self.start_client(None).await?;
        self.wait_for_pairing(PairingMethod::Qr).await
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.state.take_client() {
            client.disconnect().await;
            debug!("WhatsApp client disconnected");
        }
        if let Some(task) = self.bot_task.take() {
            task.abort();
        }
        self.state.connected.store(false, Ordering::SeqCst);
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.disconnect().await;
        if self.state.is_logged_out() {
            if let Err(e) = self.forget_device() {
                warn!("Failed to clear pairing after logout: {}", e);
            }
        }
        self.store.close();
        Ok(())
    }
}

fn parse_jid(phone_number: &str) -> Result<Jid, SessionError> {
    let raw = user_jid(phone_number)?;
    Jid::from_str(&raw).map_err(|_| SessionError::InvalidIdentifier(phone_number.to_string()))
}

fn render_qr(code: &str) {
    println!("QR code:");
    if let Err(e) = qr2term::print_qr(code) {
        warn!("qr2term failed: {}, falling back to qrcode crate", e);
        match qrcode::QrCode::new(code) {
            Ok(qr) => {
                let rendered = qr
                    .render::<char>()
                    .quiet_zone(false)
                    .module_dimensions(2, 1)
                    .build();
                println!("{}", rendered);
            }
            Err(e) => {
                warn!("Failed to generate QR code: {}", e);
                println!("Raw QR code data: {}", code);
            }
        }
    }
    println!("Scan with WhatsApp: Settings > Linked Devices > Link a Device");
}
