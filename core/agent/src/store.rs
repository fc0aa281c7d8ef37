//! Key-value stores for settings and the ephemeral cache.
//!
//! Two stores, same shape: `settings.json` survives restarts and holds the
//! user identity; `cache.json` holds the current mailbox and the last code so
//! a restarted agent (or the `status` command) can show them.

use chrono::{DateTime, Utc};
use fs_err as fs;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::session::OtpRecord;
use crate::storage::StorageConfig;

pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// JSON File Store
// ═══════════════════════════════════════════════════════════════════════════════

/// A JSON object on disk. Every write replaces the file atomically.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl JsonFileStore {
    /// Opens the store, treating a missing file as empty.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let values = match fs::read(&path) {
            Ok(data) => {
                serde_json::from_slice(&data).map_err(|source| StoreError::Malformed {
                    path: path.clone(),
                    source,
                })?
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let payload = serde_json::to_vec_pretty(&self.values).map_err(|source| {
            StoreError::Malformed {
                path: self.path.clone(),
                source,
            }
        })?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload).map_err(io_err)?;
        fs::rename(&tmp_path, &self.path).map_err(io_err)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        self.persist()
    }
}

/// In-process store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Typed Access
// ═══════════════════════════════════════════════════════════════════════════════

const USER_IDENTITY: &str = "userIdentity";
const AUTO_CONNECT: &str = "autoConnect";
const CURRENT_EMAIL: &str = "currentEmail";
const LAST_CODE: &str = "lastCode";
const LAST_CODE_TIME: &str = "lastCodeTime";
const LAST_CODE_MAILBOX: &str = "lastCodeMailbox";
const LAST_CODE_SENDER: &str = "lastCodeSender";

/// Durable settings plus the ephemeral cache.
pub struct Stores {
    settings: Box<dyn KeyValueStore>,
    cache: Box<dyn KeyValueStore>,
}

impl Stores {
    pub fn new(settings: Box<dyn KeyValueStore>, cache: Box<dyn KeyValueStore>) -> Self {
        Self { settings, cache }
    }

    pub fn open(storage: &StorageConfig) -> Result<Self, StoreError> {
        Ok(Self::new(
            Box::new(JsonFileStore::open(storage.settings_file())?),
            Box::new(JsonFileStore::open(storage.cache_file())?),
        ))
    }

    pub fn in_memory() -> Self {
        Self::new(Box::<MemoryStore>::default(), Box::<MemoryStore>::default())
    }

    fn string(store: &dyn KeyValueStore, key: &str) -> Option<String> {
        store
            .get(key)
            .and_then(|value| value.as_str().map(str::to_string))
            .filter(|value| !value.is_empty())
    }

    pub fn user_identity(&self) -> Option<String> {
        Self::string(self.settings.as_ref(), USER_IDENTITY)
    }

    pub fn set_user_identity(&mut self, identity: &str) -> Result<(), StoreError> {
        self.settings
            .set(USER_IDENTITY, Value::String(identity.to_string()))
    }

    /// Defaults to `true` when never set.
    pub fn auto_connect(&self) -> bool {
        self.settings
            .get(AUTO_CONNECT)
            .and_then(|value| value.as_bool())
            .unwrap_or(true)
    }

    pub fn set_auto_connect(&mut self, enabled: bool) -> Result<(), StoreError> {
        self.settings.set(AUTO_CONNECT, Value::Bool(enabled))
    }

    pub fn current_email(&self) -> Option<String> {
        Self::string(self.cache.as_ref(), CURRENT_EMAIL)
    }

    pub fn set_current_email(&mut self, email: &str) -> Result<(), StoreError> {
        self.cache
            .set(CURRENT_EMAIL, Value::String(email.to_string()))
    }

    pub fn last_otp(&self) -> Option<OtpRecord> {
        let code = Self::string(self.cache.as_ref(), LAST_CODE)?;
        let received_at = Self::string(self.cache.as_ref(), LAST_CODE_TIME)
            .and_then(|value| DateTime::parse_from_rfc3339(&value).ok())
            .map(|dt| dt.with_timezone(&Utc))?;
        Some(OtpRecord {
            code,
            received_at,
            mailbox: Self::string(self.cache.as_ref(), LAST_CODE_MAILBOX).unwrap_or_default(),
            sender: Self::string(self.cache.as_ref(), LAST_CODE_SENDER).unwrap_or_default(),
        })
    }

    pub fn set_last_otp(&mut self, record: &OtpRecord) -> Result<(), StoreError> {
        self.cache
            .set(LAST_CODE, Value::String(record.code.clone()))?;
        self.cache.set(
            LAST_CODE_TIME,
            Value::String(record.received_at.to_rfc3339()),
        )?;
        self.cache
            .set(LAST_CODE_MAILBOX, Value::String(record.mailbox.clone()))?;
        self.cache
            .set(LAST_CODE_SENDER, Value::String(record.sender.clone()))
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
