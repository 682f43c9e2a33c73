//! ESP-IDF implementations of the network interface traits.
//!
//! One `EspWifi` driver backs both trait objects, because ESP-IDF exposes
//! the station and AP roles through a single peripheral. The state machine
//! never runs both roles at once, so each side applies its own full
//! configuration when it takes over.
//!
//! The driver is used in its non-blocking form: `begin_join` kicks off the
//! connect and returns; the state machine polls `is_connected` on its own
//! schedule, which matches how it treats every other interface.

use std::sync::{Arc, Mutex};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
};
use esp_idf_sys::EspError;
use log::{error, info, warn};

use crate::iface::{AccessPointInterface, IpConfig, LinkStatus, StationInterface};

type SharedWifi = Arc<Mutex<EspWifi<'static>>>;

/// Build the station and access-point interfaces over one WiFi peripheral.
pub fn esp_interfaces(
    modem: Modem,
    sysloop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
) -> Result<(EspStation, EspAccessPoint), EspError> {
    let wifi = Arc::new(Mutex::new(EspWifi::new(modem, sysloop, Some(nvs))?));
    Ok((
        EspStation {
            wifi: wifi.clone(),
            joining: false,
        },
        EspAccessPoint {
            wifi,
            requested: false,
        },
    ))
}

/// Station role over the shared driver.
pub struct EspStation {
    wifi: SharedWifi,
    joining: bool,
}

impl StationInterface for EspStation {
    fn begin_join(&mut self, ssid: &str, password: &str) {
        let mut wifi = self.wifi.lock().unwrap();
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let (Ok(ssid), Ok(password)) = (ssid.try_into(), password.try_into()) else {
            error!("Credentials exceed driver limits; join not started");
            return;
        };
        let config = Configuration::Client(ClientConfiguration {
            ssid,
            password,
            auth_method,
            ..Default::default()
        });

        let started = wifi
            .set_configuration(&config)
            .and_then(|_| wifi.start())
            .and_then(|_| wifi.connect());
        match started {
            Ok(()) => self.joining = true,
            Err(e) => {
                warn!("Join start failed: {}", e);
                self.joining = false;
            }
        }
    }

    fn link_status(&self) -> LinkStatus {
        // The driver does not report join-failure causes without an event
        // subscription; unresolved attempts look like Joining and the state
        // machine's timeout covers the failure cases.
        if self.is_connected() {
            LinkStatus::Up
        } else if self.joining {
            LinkStatus::Joining
        } else {
            LinkStatus::Idle
        }
    }

    fn is_connected(&self) -> bool {
        let wifi = self.wifi.lock().unwrap();
        wifi.is_connected().unwrap_or(false) && wifi.is_up().unwrap_or(false)
    }

    fn ip_config(&self) -> Option<IpConfig> {
        let wifi = self.wifi.lock().unwrap();
        if !wifi.is_connected().unwrap_or(false) {
            return None;
        }
        let info = wifi.sta_netif().get_ip_info().ok()?;
        Some(IpConfig {
            ip: info.ip.to_string(),
            subnet: info.subnet.mask.to_string(),
            gateway: info.subnet.gateway.to_string(),
            dns: info.dns.map(|a| a.to_string()).unwrap_or_default(),
        })
    }

    fn disconnect(&mut self) {
        let mut wifi = self.wifi.lock().unwrap();
        if let Err(e) = wifi.disconnect() {
            warn!("Disconnect failed: {}", e);
        }
        if let Err(e) = wifi.stop() {
            warn!("WiFi stop failed: {}", e);
        }
        self.joining = false;
    }
}

/// Access-point role over the shared driver.
pub struct EspAccessPoint {
    wifi: SharedWifi,
    requested: bool,
}

impl AccessPointInterface for EspAccessPoint {
    fn bring_up(&mut self, ssid: &str, password: &str) {
        let mut wifi = self.wifi.lock().unwrap();
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        let (Ok(ssid), Ok(password)) = (ssid.try_into(), password.try_into()) else {
            error!("AP credentials exceed driver limits; AP not started");
            return;
        };
        let config = Configuration::AccessPoint(AccessPointConfiguration {
            ssid,
            password,
            auth_method,
            max_connections: 4,
            ..Default::default()
        });

        let started = wifi
            .set_configuration(&config)
            .and_then(|_| wifi.start());
        match started {
            Ok(()) => {
                info!("AP starting");
                self.requested = true;
            }
            Err(e) => {
                error!("AP start failed: {}", e);
                self.requested = false;
            }
        }
    }

    fn is_active(&self) -> bool {
        let wifi = self.wifi.lock().unwrap();
        self.requested && wifi.is_started().unwrap_or(false)
    }

    fn ip(&self) -> Option<String> {
        let wifi = self.wifi.lock().unwrap();
        if !(self.requested && wifi.is_started().unwrap_or(false)) {
            return None;
        }
        wifi.ap_netif()
            .get_ip_info()
            .ok()
            .map(|info| info.ip.to_string())
    }

    fn shut_down(&mut self) {
        if !self.requested {
            return;
        }
        let mut wifi = self.wifi.lock().unwrap();
        if let Err(e) = wifi.stop() {
            warn!("AP stop failed: {}", e);
        }
        self.requested = false;
    }
}
