use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;

const DEVICE_RECORD: &str = "device.plist";
const LOCK_FILE: &str = "session.lock";
const CLIENT_DB: &str = "whatsapp.db";
/// The client database and the SQLite journal files that travel with it.
const CLIENT_DB_FILES: [&str; 3] = [CLIENT_DB, "whatsapp.db-wal", "whatsapp.db-shm"];

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairingMethod {
    Qr,
    Code,
}

/// What a completed pairing left behind. A store counts as authenticated
/// while this record and the client database both exist.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DeviceRecord {
    pub jid: String,
    pub method: PairingMethod,
    pub paired_at: DateTime<Utc>,
}

/// Local session storage rooted at the configured path.
///
/// Holds an exclusive lock on `session.lock` for as long as it is open, so a
/// scheduled run and a manual `pair` can never write the client database at
/// the same time.
pub struct SessionStore {
    root: PathBuf,
    lock: Option<File>,
    device: Option<DeviceRecord>,
}

impl SessionStore {
    pub fn open(path: &Path) -> Result<Self, SessionError> {
        let storage_err = |source| SessionError::Storage {
            path: path.to_path_buf(),
            source,
        };

        std::fs::create_dir_all(path).map_err(storage_err)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path.join(LOCK_FILE))
            .map_err(storage_err)?;
        if let Err(e) = lock.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                return Err(SessionError::Locked(path.to_path_buf()));
            }
            return Err(storage_err(e));
        }

        let record_path = path.join(DEVICE_RECORD);
        let device = if record_path.exists() {
            let record: DeviceRecord = plist::from_file(&record_path)?;
            if path.join(CLIENT_DB).exists() {
                Some(record)
            } else {
                warn!(
                    "Device record for {} has no client database, treating store as unpaired",
                    record.jid
                );
                None
            }
        } else {
            None
        };

        match &device {
            Some(d) => debug!("Session store {} paired as {}", path.display(), d.jid),
            None => debug!("Session store {} has no paired device", path.display()),
        }

        Ok(Self {
            root: path.to_path_buf(),
            lock: Some(lock),
            device,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Database owned by the WhatsApp client library.
    pub fn db_path(&self) -> PathBuf {
        self.root.join(CLIENT_DB)
    }

    pub fn device(&self) -> Option<&DeviceRecord> {
        self.device.as_ref()
    }

    pub fn is_paired(&self) -> bool {
        self.device.is_some()
    }

    pub fn record_pairing(
        &mut self,
        jid: &str,
        method: PairingMethod,
    ) -> Result<&DeviceRecord, SessionError> {
        let record = DeviceRecord {
            jid: jid.to_string(),
            method,
            paired_at: Utc::now(),
        };

        let final_path = self.root.join(DEVICE_RECORD);
        let tmp_path = self.root.join(format!("{}.tmp", DEVICE_RECORD));
        plist::to_file_xml(&tmp_path, &record)?;
        std::fs::rename(&tmp_path, &final_path).map_err(|source| SessionError::Storage {
            path: final_path.clone(),
            source,
        })?;

        info!("Recorded pairing for {} ({:?})", record.jid, record.method);
        Ok(self.device.insert(record))
    }

    /// Drops the device record and the client database with its journal.
    pub fn forget(&mut self) -> Result<(), SessionError> {
        for name in std::iter::once(DEVICE_RECORD).chain(CLIENT_DB_FILES) {
            let path = self.root.join(name);
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(SessionError::Storage { path, source }),
            }
        }
        self.device = None;
        Ok(())
    }

    /// Releases the storage lock. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = FileExt::unlock(&lock);
            debug!("Released session store {}", self.root.display());
        }
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        self.close();
    }
}
