//! Versioned persistence for the WiFi credential record.
//!
//! One JSON document at a fixed path is the single source of truth across
//! reboots:
//!
//! ```json
//! {"version":2,"wifi":{"ssid":"...","password":"..."}}
//! ```
//!
//! Legacy records written before versioning (`{"ssid":...,"password":...}`
//! at the top level) are treated as version 1 and migrated forward one step
//! at a time; the migrated form is persisted immediately so the file heals
//! itself on first read. Saves merge into an existing current-version record
//! so unrelated top-level sections survive, then read the file back and
//! verify the version field, because the storage medium is assumed
//! unreliable.
//!
//! Per the error-handling contract, outcomes at this boundary are booleans
//! and options: a missing or unparseable file is "no configuration", not an
//! error, since first boot has none.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Current schema version of the persisted record.
pub const SCHEMA_VERSION: u64 = 2;

/// Default record path, relative to the working directory.
pub const DEFAULT_PATH: &str = "wifi_config.json";

/// The `wifi` section of the record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSection {
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub password: String,
}

/// Handle on the persisted credential record.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by [`DEFAULT_PATH`].
    pub fn open_default() -> Self {
        Self::new(DEFAULT_PATH)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, migrating it to [`SCHEMA_VERSION`] if needed.
    ///
    /// A migrated record is re-persisted before this returns, so the on-disk
    /// version equals the schema version after any successful load. Returns
    /// `None` when no configuration exists or the file cannot be parsed.
    pub fn load(&self) -> Option<Value> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No credential record at {:?}", self.path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read credential record: {}", e);
                return None;
            }
        };

        let data: Value = match serde_json::from_str(&raw) {
            Ok(Value::Object(map)) => Value::Object(map),
            Ok(_) => {
                error!("Credential record is not a JSON object");
                return None;
            }
            Err(e) => {
                error!("Failed to parse credential record: {}", e);
                return None;
            }
        };

        let version = record_version(&data);
        if version < SCHEMA_VERSION {
            let migrated = migrate(data);
            if !self.save_raw(&migrated) {
                warn!("Failed to persist migrated credential record");
            }
            return Some(migrated);
        }

        Some(data)
    }

    /// (ssid, password) from either schema shape.
    ///
    /// Returns `None` when no record exists or no non-empty SSID is stored.
    /// A missing password field is reported as an empty string (open
    /// network).
    pub fn credentials(&self) -> Option<(String, String)> {
        let data = self.load()?;
        let section = data.get("wifi").unwrap_or(&data);
        let wifi: WifiSection = serde_json::from_value(section.clone()).ok()?;
        if wifi.ssid.is_empty() {
            return None;
        }
        Some((wifi.ssid, wifi.password))
    }

    /// Save credentials, merging into an existing current-version record.
    ///
    /// Returns true only if the write was verified by reading the record
    /// back and matching its version field.
    pub fn save(&self, ssid: &str, password: &str) -> bool {
        let wifi = json!({ "ssid": ssid, "password": password });
        let data = match self.load() {
            Some(mut existing) if record_version(&existing) == SCHEMA_VERSION => {
                existing["wifi"] = wifi;
                existing
            }
            _ => json!({ "version": SCHEMA_VERSION, "wifi": wifi }),
        };
        self.save_raw(&data)
    }

    /// Remove the record (factory reset of network settings).
    ///
    /// Returns false when the file did not exist; that is "nothing to do",
    /// not a failure.
    pub fn delete(&self) -> bool {
        match fs::remove_file(&self.path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to delete credential record: {}", e);
                false
            }
        }
    }

    /// Version of the stored record: 0 when none exists.
    pub fn version(&self) -> u64 {
        match self.load() {
            Some(data) => record_version(&data),
            None => 0,
        }
    }

    /// Write the record, then read it back and verify the version field.
    fn save_raw(&self, data: &Value) -> bool {
        let serialized = match serde_json::to_string(data) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to serialize credential record: {}", e);
                return false;
            }
        };
        if let Err(e) = fs::write(&self.path, serialized) {
            error!("Failed to write credential record: {}", e);
            return false;
        }

        let verified = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .map(|saved| record_version(&saved) == record_version(data))
            .unwrap_or(false);
        if !verified {
            error!("Credential record verification failed: content mismatch");
            return false;
        }

        info!("Credential record saved and verified");
        true
    }
}

/// Version field of a record; version-less records are treated as v1.
fn record_version(data: &Value) -> u64 {
    data.get("version").and_then(Value::as_u64).unwrap_or(1)
}

/// Migrate a record forward one step at a time to [`SCHEMA_VERSION`].
fn migrate(data: Value) -> Value {
    let mut data = data;
    let mut version = record_version(&data);
    while version < SCHEMA_VERSION {
        data = match version {
            1 => migrate_v1_to_v2(&data),
            // No other versions exist below SCHEMA_VERSION.
            _ => break,
        };
        version = record_version(&data);
    }
    data
}

/// v1 kept ssid/password at the top level with no version field.
fn migrate_v1_to_v2(data: &Value) -> Value {
    json!({
        "version": 2,
        "wifi": {
            "ssid": data.get("ssid").and_then(Value::as_str).unwrap_or(""),
            "password": data.get("password").and_then(Value::as_str).unwrap_or(""),
        }
    })
}
