//! Core WiFi management: connection lifecycle, retries, AP fallback.
//!
//! [`WifiManager`] owns the station and access-point interfaces, the captive
//! DNS responder, and the provisioning HTTP server, and drives them from a
//! single perpetual loop. Failures inside the loop never escape it: they
//! become state transitions, or are logged and retried after a backoff.
//!
//! At construction the manager loads the credential store and either starts
//! a connection attempt or goes straight to AP mode. In AP mode it serves
//! the captive portal; a valid submission writes the store and schedules a
//! restart through the portal hooks.
//!
//! Collaborators observe the machine through [`WifiManager::on`]; callbacks
//! run inline on the machine's task, so keep them brief and do not call back
//! into the manager from inside one.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{Credentials, RuntimeConfig};
use crate::dns::DnsServer;
use crate::events::{Event, EventBus, EventCallback, EventKind, Subscription};
use crate::http::{HttpServer, Router};
use crate::iface::{AccessPointInterface, IpConfig, StationInterface};
use crate::portal::{PortalHooks, ProvisioningHandler};
use crate::state::ConnectionState;
use crate::store::CredentialStore;

/// AP activation budget: 50 polls of 100 ms.
const AP_ACTIVATION_POLLS: u32 = 50;
const AP_ACTIVATION_POLL_PERIOD: Duration = Duration::from_millis(100);

/// Poll cadence of a join attempt within its timeout.
const JOIN_POLL_PERIOD: Duration = Duration::from_millis(500);

/// Pause between driving-loop iterations.
const LOOP_TICK: Duration = Duration::from_millis(100);

/// Backoff after an unexpected error inside the driving loop.
const LOOP_ERROR_BACKOFF: Duration = Duration::from_secs(5);

const IDLE_POLL_PERIOD: Duration = Duration::from_secs(1);
const AP_MODE_POLL_PERIOD: Duration = Duration::from_secs(2);

/// Access-point parameters for external display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApConfig {
    pub ssid: String,
    pub password: String,
    pub ip: String,
}

/// Errors surfaced inside the driving loop.
///
/// These never reach the public API; the loop logs them and resumes after
/// [`LOOP_ERROR_BACKOFF`].
#[derive(Debug)]
pub enum ManagerError {
    /// The provisioning HTTP server failed to bind.
    PortalStart(std::io::Error),
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerError::PortalStart(e) => write!(f, "portal server start failed: {}", e),
        }
    }
}

impl std::error::Error for ManagerError {}

/// State owned exclusively by the driving loop and the public operations,
/// serialized behind one lock. The lock is never held across a long wait.
struct Core {
    state: ConnectionState,
    retry_count: u32,
    target: Option<Credentials>,
    station: Box<dyn StationInterface>,
    ap: Box<dyn AccessPointInterface>,
    dns: DnsServer,
    http: HttpServer,
}

struct Shared {
    config: RuntimeConfig,
    events: EventBus,
    store: CredentialStore,
    core: Mutex<Core>,
}

/// Handle on the connectivity state machine.
pub struct WifiManager {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

impl WifiManager {
    /// Construct the machine and spawn its driving loop.
    ///
    /// Must be called within a tokio runtime. The loop immediately loads the
    /// credential store and either begins connecting or enters AP mode.
    pub fn start(
        config: RuntimeConfig,
        station: Box<dyn StationInterface>,
        ap: Box<dyn AccessPointInterface>,
        store: CredentialStore,
    ) -> Self {
        Self::start_with_hooks(config, station, ap, store, PortalHooks::default())
    }

    /// Like [`WifiManager::start`], with explicit portal hooks (restart
    /// action, saved-credentials notification).
    pub fn start_with_hooks(
        config: RuntimeConfig,
        station: Box<dyn StationInterface>,
        ap: Box<dyn AccessPointInterface>,
        store: CredentialStore,
        hooks: PortalHooks,
    ) -> Self {
        let dns = DnsServer::with_port(&config.ap_ip, config.dns_port);
        let mut router = Router::new();
        ProvisioningHandler::new(store.clone(), hooks).register_routes(&mut router);
        let http = HttpServer::new(router);

        let shared = Arc::new(Shared {
            config,
            events: EventBus::new(),
            store,
            core: Mutex::new(Core {
                state: ConnectionState::Idle,
                retry_count: 0,
                target: None,
                station,
                ap,
                dns,
                http,
            }),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared.clone(), cancel.clone()));
        Self {
            shared,
            cancel,
            _task: task,
        }
    }

    /// Set target credentials and force a connection attempt, regardless of
    /// the current state. Resets the retry budget.
    pub async fn connect(&self, ssid: &str, password: &str) {
        self.shared.force_connect(ssid, password).await;
    }

    /// Drop any station link or in-flight join attempt, stop AP services,
    /// and settle in Idle.
    pub async fn disconnect(&self) {
        let mut core = self.shared.core.lock().await;
        core.station.disconnect();
        self.shared.transition(&mut core, ConnectionState::Idle);
        core.retry_count = 0;
        stop_ap_services(&mut core);
    }

    /// Force provisioning AP mode.
    pub async fn enter_ap_mode(&self) {
        let mut core = self.shared.core.lock().await;
        stop_ap_services(&mut core);
        core.station.disconnect();
        self.shared.transition(&mut core, ConnectionState::ApMode);
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionState::Connected
    }

    pub async fn is_ap_mode(&self) -> bool {
        self.status().await == ConnectionState::ApMode
    }

    /// Current state.
    pub async fn status(&self) -> ConnectionState {
        self.shared.core.lock().await.state
    }

    /// Current state name.
    pub async fn status_name(&self) -> &'static str {
        self.status().await.name()
    }

    /// Station (ip, subnet, gateway, dns); `None` when not connected.
    pub async fn ip_config(&self) -> Option<IpConfig> {
        self.shared.core.lock().await.station.ip_config()
    }

    /// AP parameters for external display, valid in any state.
    pub fn ap_config(&self) -> ApConfig {
        ApConfig {
            ssid: self.shared.config.ap_ssid.clone(),
            password: self.shared.config.ap_password.clone(),
            ip: self.shared.config.ap_ip.clone(),
        }
    }

    /// Address of the provisioning HTTP server while it is running.
    pub async fn portal_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared.core.lock().await.http.local_addr()
    }

    /// Address of the DNS responder while it is running.
    pub async fn dns_addr(&self) -> Option<std::net::SocketAddr> {
        self.shared.core.lock().await.dns.local_addr()
    }

    /// Subscribe to an event channel. See [`EventBus::on`].
    pub fn on(&self, kind: EventKind, callback: EventCallback) -> Subscription {
        self.shared.events.on(kind, callback)
    }

    /// Unsubscribe one registration. See [`EventBus::off`].
    pub fn off(&self, kind: EventKind, sub: Subscription) -> bool {
        self.shared.events.off(kind, sub)
    }

    /// Remove every subscriber of a channel.
    pub fn clear_listeners(&self, kind: EventKind) {
        self.shared.events.clear(kind)
    }

    /// The event bus, for collaborators that outlive this handle.
    pub fn events(&self) -> EventBus {
        self.shared.events.clone()
    }

    /// Stop the driving loop and tear down interfaces and services.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut core = self.shared.core.lock().await;
        stop_ap_services(&mut core);
        core.station.disconnect();
        debug!("Manager shut down");
    }
}

impl Shared {
    /// The single gating operation every transition passes through.
    ///
    /// No-ops when the state is unchanged; otherwise logs, swaps the state,
    /// and emits `state_change` plus at most one state-specific event. The
    /// specific events are prioritized: entering Connected wins, then
    /// leaving Connected, then entering ApMode or Fail.
    fn transition(&self, core: &mut Core, new: ConnectionState) {
        if core.state == new {
            return;
        }
        let old = core.state;
        info!("State: {} -> {}", old, new);
        core.state = new;

        self.events.emit(&Event::StateChange { old, new });
        if new == ConnectionState::Connected {
            let ip = core
                .station
                .ip_config()
                .map(|c| c.ip)
                .unwrap_or_default();
            self.events.emit(&Event::Connected { ip });
        } else if old == ConnectionState::Connected {
            self.events.emit(&Event::Disconnected);
        } else if new == ConnectionState::ApMode {
            self.events.emit(&Event::ApModeStarted {
                ssid: self.config.ap_ssid.clone(),
            });
        } else if new == ConnectionState::Fail {
            self.events.emit(&Event::ConnectionFailed {
                retry_count: core.retry_count,
            });
        }
    }

    async fn force_connect(&self, ssid: &str, password: &str) {
        let mut core = self.core.lock().await;
        core.target = Some(Credentials::new(ssid, password));
        core.retry_count = 0;
        self.transition(&mut core, ConnectionState::Connecting);
    }

    /// Load stored credentials and pick the boot path.
    async fn load_and_connect(&self) {
        match self.store.credentials() {
            Some((ssid, password)) => {
                info!("Found stored credentials for '{}'", ssid);
                self.force_connect(&ssid, &password).await;
            }
            None => {
                info!("No stored credentials, entering AP mode");
                let mut core = self.core.lock().await;
                self.transition(&mut core, ConnectionState::ApMode);
            }
        }
    }

    /// Idle: wait for an explicit `connect()`.
    async fn handle_idle(&self) -> Result<(), ManagerError> {
        sleep(IDLE_POLL_PERIOD).await;
        Ok(())
    }

    /// Connecting: run one join attempt against the timeout, then retry,
    /// succeed, or exhaust the budget.
    async fn handle_connecting(&self) -> Result<(), ManagerError> {
        {
            let mut core = self.core.lock().await;
            if core.state != ConnectionState::Connecting {
                return Ok(());
            }
            stop_ap_services(&mut core);
            let Some(target) = core.target.clone() else {
                warn!("Connecting with no target credentials");
                self.transition(&mut core, ConnectionState::Idle);
                return Ok(());
            };
            info!(
                "Connecting to '{}' (attempt {}/{})",
                target.ssid,
                core.retry_count + 1,
                self.config.max_retries
            );
            core.station.begin_join(&target.ssid, &target.password);
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.connect_timeout_s);
        loop {
            {
                let mut core = self.core.lock().await;
                // The attempt was cancelled by a forced transition
                if core.state != ConnectionState::Connecting {
                    return Ok(());
                }
                if core.station.is_connected() {
                    let ip = core
                        .station
                        .ip_config()
                        .map(|c| c.ip)
                        .unwrap_or_default();
                    info!("Connected! IP: {}", ip);
                    self.transition(&mut core, ConnectionState::Connected);
                    core.retry_count = 0;
                    return Ok(());
                }
                let status = core.station.link_status();
                if status.is_failure() {
                    debug!("Join attempt failed with status {:?}", status);
                    break;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep(JOIN_POLL_PERIOD).await;
        }

        let mut core = self.core.lock().await;
        if core.state != ConnectionState::Connecting {
            return Ok(());
        }
        core.retry_count += 1;
        if core.retry_count >= self.config.max_retries {
            warn!("Max retries reached");
            self.transition(&mut core, ConnectionState::Fail);
        } else {
            core.station.disconnect();
            drop(core);
            sleep(Duration::from_secs(self.config.retry_delay_s)).await;
        }
        Ok(())
    }

    /// Connected: health-check the link.
    async fn handle_connected(&self) -> Result<(), ManagerError> {
        {
            let mut core = self.core.lock().await;
            if core.state != ConnectionState::Connected {
                return Ok(());
            }
            if !core.station.is_connected() {
                warn!("Connection lost, reconnecting...");
                core.station.disconnect();
                core.retry_count = 0;
                self.transition(&mut core, ConnectionState::Connecting);
                return Ok(());
            }
        }
        sleep(Duration::from_secs(self.config.health_check_interval_s)).await;
        Ok(())
    }

    /// Fail: cool down, abortable by any forced transition, then fall back
    /// to AP mode.
    async fn handle_fail(&self) -> Result<(), ManagerError> {
        info!(
            "Cooldown {}s before AP mode",
            self.config.fail_recovery_delay_s
        );
        for _ in 0..self.config.fail_recovery_delay_s {
            if self.core.lock().await.state != ConnectionState::Fail {
                return Ok(());
            }
            sleep(Duration::from_secs(1)).await;
        }
        let mut core = self.core.lock().await;
        if core.state != ConnectionState::Fail {
            return Ok(());
        }
        core.retry_count = 0;
        self.transition(&mut core, ConnectionState::ApMode);
        Ok(())
    }

    /// ApMode: bring up the AP, then the DNS responder and the portal.
    async fn handle_ap_mode(&self) -> Result<(), ManagerError> {
        let activating = {
            let mut core = self.core.lock().await;
            if core.state != ConnectionState::ApMode {
                return Ok(());
            }
            if core.ap.is_active() {
                false
            } else {
                info!("Starting AP '{}'", self.config.ap_ssid);
                core.ap
                    .bring_up(&self.config.ap_ssid, &self.config.ap_password);
                true
            }
        };

        if activating {
            let mut activated = false;
            for _ in 0..AP_ACTIVATION_POLLS {
                {
                    let core = self.core.lock().await;
                    if core.state != ConnectionState::ApMode {
                        return Ok(());
                    }
                    if core.ap.is_active() {
                        activated = true;
                    }
                }
                if activated {
                    break;
                }
                sleep(AP_ACTIVATION_POLL_PERIOD).await;
            }

            let mut core = self.core.lock().await;
            if core.state != ConnectionState::ApMode {
                return Ok(());
            }
            if !activated && !core.ap.is_active() {
                error!("AP activation timeout");
                self.transition(&mut core, ConnectionState::Fail);
                return Ok(());
            }
        }

        // Services are (re)started whenever the AP is active and a listener
        // is down, so a failed bind is retried on the next pass.
        {
            let mut core = self.core.lock().await;
            if core.state != ConnectionState::ApMode {
                return Ok(());
            }
            if core.ap.is_active() && (!core.dns.is_running() || !core.http.is_running()) {
                let ip = core.ap.ip().unwrap_or_else(|| self.config.ap_ip.clone());
                info!("AP active at {}", ip);
                core.dns.set_redirect_ip(&ip);
                core.dns.start().await;
                core.http
                    .start("0.0.0.0", self.config.http_port)
                    .await
                    .map_err(ManagerError::PortalStart)?;
            }
        }

        sleep(AP_MODE_POLL_PERIOD).await;
        Ok(())
    }
}

/// Stop the AP interface and its services. Idempotent.
fn stop_ap_services(core: &mut Core) {
    if core.dns.is_running() || core.http.is_running() || core.ap.is_active() {
        debug!("Stopping AP services");
    }
    core.dns.stop();
    core.http.stop();
    core.ap.shut_down();
}

/// The perpetual driving loop.
async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    info!("State machine started");
    shared.load_and_connect().await;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let state = shared.core.lock().await.state;
        let step = match state {
            ConnectionState::Idle => shared.handle_idle().await,
            ConnectionState::Connecting => shared.handle_connecting().await,
            ConnectionState::Connected => shared.handle_connected().await,
            ConnectionState::Fail => shared.handle_fail().await,
            ConnectionState::ApMode => shared.handle_ap_mode().await,
        };
        if let Err(e) = step {
            error!("State machine error: {}", e);
            sleep(LOOP_ERROR_BACKOFF).await;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(LOOP_TICK) => {}
        }
    }
    debug!("State machine loop exited");
}
