//! Network interface traits the state machine drives.
//!
//! Both traits are non-blocking poll-style: an operation is started, then the
//! caller polls status at its own cadence. All waiting therefore lives in the
//! state machine, which keeps the drivers trivial and the timing testable.
//!
//! Implementations: [`crate::sim`] for host tests and demos, [`crate::esp`]
//! for ESP-IDF hardware (feature `esp32`).

/// Status of a station join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// No join attempt in progress.
    Idle,
    /// A join attempt is in progress.
    Joining,
    /// Joined; the link is up.
    Up,
    /// The target network was not found.
    NoApFound,
    /// The target network rejected the passphrase.
    WrongPassword,
    /// The join failed for another driver-reported reason.
    JoinFailed,
}

impl LinkStatus {
    /// True for statuses that abort a join attempt before its timeout.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            LinkStatus::NoApFound | LinkStatus::WrongPassword | LinkStatus::JoinFailed
        )
    }
}

/// IP configuration of the station interface while connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpConfig {
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    pub dns: String,
}

/// The interface role used to join an existing network.
pub trait StationInterface: Send {
    /// Start a join attempt. Any previous attempt or link is superseded.
    fn begin_join(&mut self, ssid: &str, password: &str);

    /// Status of the current attempt or link.
    fn link_status(&self) -> LinkStatus;

    /// True while the link is up.
    fn is_connected(&self) -> bool;

    /// (ip, subnet, gateway, dns) while connected, `None` otherwise.
    fn ip_config(&self) -> Option<IpConfig>;

    /// Drop the link and abort any join attempt.
    fn disconnect(&mut self);
}

/// The interface role used to host the provisioning access point.
pub trait AccessPointInterface: Send {
    /// Configure and start activating the access point.
    fn bring_up(&mut self, ssid: &str, password: &str);

    /// True once the access point is active.
    fn is_active(&self) -> bool;

    /// The access point's own address once active.
    fn ip(&self) -> Option<String>;

    /// Deactivate the access point. No-op when inactive.
    fn shut_down(&mut self);
}
