//! Runtime configuration and credential types.
//!
//! [`RuntimeConfig`] carries the tunables of the connectivity state machine
//! and the provisioning access point. Every field has a documented default;
//! override individual fields with struct-update syntax:
//!
//! ```
//! use picore_net::config::RuntimeConfig;
//!
//! let config = RuntimeConfig {
//!     max_retries: 3,
//!     ap_ssid: "MyDevice-Setup".into(),
//!     ..RuntimeConfig::default()
//! };
//! assert_eq!(config.connect_timeout_s, 15);
//! ```

use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum SSID length per IEEE 802.11.
pub const MAX_SSID_LEN: usize = 32;

/// Minimum WPA2 passphrase length.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// Maximum WPA2 passphrase length.
pub const MAX_PASSPHRASE_LEN: usize = 63;

/// Tunables for the state machine and the provisioning access point.
///
/// Immutable after construction; the manager takes it by value.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Connection attempts before entering FAIL (default 5).
    pub max_retries: u32,
    /// Per-attempt join wait in seconds (default 15).
    pub connect_timeout_s: u64,
    /// Pause between attempts in seconds (default 2).
    pub retry_delay_s: u64,
    /// Cooldown in FAIL before AP fallback, in seconds (default 30).
    pub fail_recovery_delay_s: u64,
    /// Liveness poll period while connected, in seconds (default 2).
    pub health_check_interval_s: u64,
    /// SSID of the provisioning access point (default "Picore-W-Setup").
    pub ap_ssid: String,
    /// Password of the provisioning access point (default "12345678").
    pub ap_password: String,
    /// IP address of the provisioning access point (default "192.168.4.1").
    pub ap_ip: String,
    /// TCP port of the provisioning HTTP server (default 80).
    pub http_port: u16,
    /// UDP port of the captive DNS responder (default 53).
    pub dns_port: u16,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            connect_timeout_s: 15,
            retry_delay_s: 2,
            fail_recovery_delay_s: 30,
            health_check_interval_s: 2,
            ap_ssid: "Picore-W-Setup".to_string(),
            ap_password: "12345678".to_string(),
            ap_ip: "192.168.4.1".to_string(),
            http_port: 80,
            dns_port: 53,
        }
    }
}

/// A target (ssid, password) pair the state machine attempts to join.
///
/// Zeroed on drop so credentials do not linger in freed memory.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Check the pair against [`validate_ssid`] and [`validate_passphrase`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_ssid(&self.ssid)?;
        validate_passphrase(&self.password)
    }

    /// True for an open network (no passphrase).
    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// Never print the password, not even in debug output.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Validate an SSID: 1-32 bytes.
pub fn validate_ssid(ssid: &str) -> Result<(), ConfigError> {
    if ssid.is_empty() {
        return Err(ConfigError::SsidEmpty);
    }
    if ssid.len() > MAX_SSID_LEN {
        return Err(ConfigError::SsidTooLong {
            len: ssid.len(),
            max: MAX_SSID_LEN,
        });
    }
    Ok(())
}

/// Validate a WPA2 passphrase: empty (open network) or 8-63 bytes.
pub fn validate_passphrase(password: &str) -> Result<(), ConfigError> {
    if !password.is_empty() && password.len() < MIN_PASSPHRASE_LEN {
        return Err(ConfigError::PassphraseTooShort {
            len: password.len(),
            min: MIN_PASSPHRASE_LEN,
        });
    }
    if password.len() > MAX_PASSPHRASE_LEN {
        return Err(ConfigError::PassphraseTooLong {
            len: password.len(),
            max: MAX_PASSPHRASE_LEN,
        });
    }
    Ok(())
}

/// Errors from credential validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// SSID is empty.
    SsidEmpty,
    /// SSID exceeds the maximum length.
    SsidTooLong { len: usize, max: usize },
    /// Passphrase is shorter than WPA2 allows.
    PassphraseTooShort { len: usize, min: usize },
    /// Passphrase exceeds the maximum length.
    PassphraseTooLong { len: usize, max: usize },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SsidEmpty => write!(f, "SSID cannot be empty"),
            Self::SsidTooLong { len, max } => {
                write!(f, "SSID too long: {} bytes (max {})", len, max)
            }
            Self::PassphraseTooShort { len, min } => {
                write!(f, "passphrase too short: {} bytes (min {})", len, min)
            }
            Self::PassphraseTooLong { len, max } => {
                write!(f, "passphrase too long: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
