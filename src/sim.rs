//! Scripted network interfaces for host development and tests.
//!
//! [`SimNetwork`] is a control handle describing how the simulated radio
//! environment behaves; [`SimStation`] and [`SimAccessPoint`] implement the
//! interface traits against it. Tests script an outcome, hand the interfaces
//! to the state machine, and assert on the resulting transitions:
//!
//! ```no_run
//! use picore_net::sim::{JoinOutcome, SimNetwork};
//!
//! let net = SimNetwork::new();
//! net.set_join_outcome(JoinOutcome::WrongPassword);
//! let station = net.station();
//! let ap = net.access_point();
//! ```
//!
//! Timing uses `tokio::time::Instant`, so tests running under a paused tokio
//! clock advance deterministically.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use crate::iface::{AccessPointInterface, IpConfig, LinkStatus, StationInterface};

/// How a scripted join attempt resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The join succeeds after the configured latency.
    Success,
    /// The join never completes; the state machine's timeout fires.
    Timeout,
    /// The driver reports the network as absent after the latency.
    NoApFound,
    /// The driver rejects the passphrase after the latency.
    WrongPassword,
}

struct SimState {
    join_outcome: JoinOutcome,
    join_latency: Duration,
    join_started: Option<Instant>,
    join_attempts: u32,
    last_join_target: Option<(String, String)>,
    station_ip: IpConfig,
    ap_should_activate: bool,
    ap_latency: Duration,
    ap_requested: Option<Instant>,
    ap_ip: String,
}

impl SimState {
    fn link_status(&self) -> LinkStatus {
        let Some(started) = self.join_started else {
            return LinkStatus::Idle;
        };
        if started.elapsed() < self.join_latency {
            return LinkStatus::Joining;
        }
        match self.join_outcome {
            JoinOutcome::Success => LinkStatus::Up,
            JoinOutcome::Timeout => LinkStatus::Joining,
            JoinOutcome::NoApFound => LinkStatus::NoApFound,
            JoinOutcome::WrongPassword => LinkStatus::WrongPassword,
        }
    }

    fn ap_active(&self) -> bool {
        match self.ap_requested {
            Some(requested) => self.ap_should_activate && requested.elapsed() >= self.ap_latency,
            None => false,
        }
    }
}

/// Shared control handle over the simulated radio environment.
#[derive(Clone)]
pub struct SimNetwork {
    state: Arc<Mutex<SimState>>,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                join_outcome: JoinOutcome::Success,
                join_latency: Duration::from_millis(200),
                join_started: None,
                join_attempts: 0,
                last_join_target: None,
                station_ip: IpConfig {
                    ip: "192.168.1.50".to_string(),
                    subnet: "255.255.255.0".to_string(),
                    gateway: "192.168.1.1".to_string(),
                    dns: "192.168.1.1".to_string(),
                },
                ap_should_activate: true,
                ap_latency: Duration::from_millis(100),
                ap_requested: None,
                ap_ip: "192.168.4.1".to_string(),
            })),
        }
    }

    /// A station interface bound to this environment.
    pub fn station(&self) -> SimStation {
        SimStation { net: self.clone() }
    }

    /// An access-point interface bound to this environment.
    pub fn access_point(&self) -> SimAccessPoint {
        SimAccessPoint { net: self.clone() }
    }

    /// Script how subsequent join attempts resolve.
    pub fn set_join_outcome(&self, outcome: JoinOutcome) {
        self.state.lock().unwrap().join_outcome = outcome;
    }

    /// Time between `begin_join` and the scripted outcome.
    pub fn set_join_latency(&self, latency: Duration) {
        self.state.lock().unwrap().join_latency = latency;
    }

    /// Drop an established link, as a real network outage would.
    pub fn drop_link(&self) {
        self.state.lock().unwrap().join_started = None;
    }

    /// Script whether AP activation succeeds.
    pub fn set_ap_activation(&self, activates: bool) {
        self.state.lock().unwrap().ap_should_activate = activates;
    }

    /// Time between `bring_up` and the AP reporting active.
    pub fn set_ap_latency(&self, latency: Duration) {
        self.state.lock().unwrap().ap_latency = latency;
    }

    /// Address the simulated AP reports once active.
    pub fn set_ap_ip(&self, ip: impl Into<String>) {
        self.state.lock().unwrap().ap_ip = ip.into();
    }

    /// Address configuration the simulated station reports once connected.
    pub fn set_station_ip(&self, ip_config: IpConfig) {
        self.state.lock().unwrap().station_ip = ip_config;
    }

    /// Whether the simulated AP is currently active.
    pub fn ap_is_active(&self) -> bool {
        self.state.lock().unwrap().ap_active()
    }

    /// Number of join attempts started so far.
    pub fn join_attempts(&self) -> u32 {
        self.state.lock().unwrap().join_attempts
    }

    /// (ssid, password) of the most recent join attempt.
    pub fn last_join_target(&self) -> Option<(String, String)> {
        self.state.lock().unwrap().last_join_target.clone()
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Simulated station interface.
pub struct SimStation {
    net: SimNetwork,
}

impl StationInterface for SimStation {
    fn begin_join(&mut self, ssid: &str, password: &str) {
        let mut state = self.net.state.lock().unwrap();
        state.join_started = Some(Instant::now());
        state.join_attempts += 1;
        state.last_join_target = Some((ssid.to_string(), password.to_string()));
    }

    fn link_status(&self) -> LinkStatus {
        self.net.state.lock().unwrap().link_status()
    }

    fn is_connected(&self) -> bool {
        self.net.state.lock().unwrap().link_status() == LinkStatus::Up
    }

    fn ip_config(&self) -> Option<IpConfig> {
        let state = self.net.state.lock().unwrap();
        if state.link_status() == LinkStatus::Up {
            Some(state.station_ip.clone())
        } else {
            None
        }
    }

    fn disconnect(&mut self) {
        self.net.state.lock().unwrap().join_started = None;
    }
}

/// Simulated access-point interface.
pub struct SimAccessPoint {
    net: SimNetwork,
}

impl AccessPointInterface for SimAccessPoint {
    fn bring_up(&mut self, _ssid: &str, _password: &str) {
        self.net.state.lock().unwrap().ap_requested = Some(Instant::now());
    }

    fn is_active(&self) -> bool {
        self.net.state.lock().unwrap().ap_active()
    }

    fn ip(&self) -> Option<String> {
        let state = self.net.state.lock().unwrap();
        if state.ap_active() {
            Some(state.ap_ip.clone())
        } else {
            None
        }
    }

    fn shut_down(&mut self) {
        self.net.state.lock().unwrap().ap_requested = None;
    }
}
