//! Self-managing WiFi connectivity for headless embedded devices.
//!
//! The crate gives a screen-less network-connected device a full
//! connectivity lifecycle: it joins with stored credentials, retries with
//! backoff, falls back to hosting its own access point with a captive-portal
//! provisioning flow when nothing works, and persists newly submitted
//! credentials for future boots.
//!
//! The core is platform independent and runs (and is tested) on the host;
//! ESP-IDF hardware bindings live behind the `esp32` feature.
//!
//! # Components
//!
//! - [`manager`] - the connectivity state machine
//! - [`dns`] - captive-portal DNS responder
//! - [`http`] / [`portal`] - provisioning HTTP server and routes
//! - [`store`] - versioned credential persistence
//! - [`events`] - typed event channels for external collaborators
//! - [`iface`] - the station/AP driver traits, with [`sim`] and `esp`
//!   implementations

pub mod config;
pub mod dns;
#[cfg(feature = "esp32")]
pub mod esp;
pub mod events;
pub mod http;
pub mod iface;
pub mod manager;
pub mod portal;
pub mod sim;
pub mod state;
pub mod store;

// Re-export commonly used items
pub use config::{Credentials, RuntimeConfig};
pub use events::{Event, EventBus, EventKind, Subscription};
pub use manager::{ApConfig, WifiManager};
pub use state::ConnectionState;
pub use store::CredentialStore;
