//! Host demo: the full provisioning lifecycle against simulated radios.
//!
//! Runs the state machine with the `sim` interfaces, so the captive portal
//! and DNS responder listen on real local sockets while the WiFi side is
//! scripted. Point a browser at the logged portal address, submit
//! credentials, and watch the events.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portal-demo
//! RUST_LOG=debug cargo run --bin portal-demo
//! ```

#[cfg(not(target_os = "espidf"))]
#[tokio::main(flavor = "current_thread")]
async fn main() {
    use std::sync::Arc;

    use log::info;
    use picore_net::events::EventKind;
    use picore_net::portal::PortalHooks;
    use picore_net::sim::SimNetwork;
    use picore_net::{CredentialStore, Event, RuntimeConfig, WifiManager};

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("=== picore-net portal demo starting ===");

    // Unprivileged ports so the demo runs without root
    let config = RuntimeConfig {
        http_port: 8080,
        dns_port: 5353,
        ..RuntimeConfig::default()
    };

    let net = SimNetwork::new();
    let store = CredentialStore::open_default();
    let hooks = PortalHooks {
        on_saved: Some(Arc::new(|ssid: &str, _password: &str| {
            log::info!("Credentials accepted for '{}'", ssid);
        })),
        restart: Arc::new(|| {
            log::info!("Restart requested (a real device would reboot here)");
        }),
    };

    let manager = WifiManager::start_with_hooks(
        config,
        Box::new(net.station()),
        Box::new(net.access_point()),
        store,
        hooks,
    );

    // Print every lifecycle event as it happens
    let printer: picore_net::events::EventCallback = Arc::new(|event: &Event| {
        log::info!("event: {:?}", event);
        Ok(())
    });
    for kind in EventKind::ALL {
        manager.on(kind, printer.clone());
    }

    // Give the machine a moment to settle, then report where the portal is
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    let ap = manager.ap_config();
    info!("AP config: ssid={} password={} ip={}", ap.ssid, ap.password, ap.ip);
    if let Some(addr) = manager.portal_addr().await {
        info!("Portal listening at http://localhost:{}/", addr.port());
    }
    if let Some(addr) = manager.dns_addr().await {
        info!("DNS responder on udp port {}", addr.port());
    }

    info!("Press Ctrl+C to exit");
    let _ = tokio::signal::ctrl_c().await;
    manager.shutdown().await;
    info!("Demo stopped");
}

#[cfg(target_os = "espidf")]
fn main() {
    println!("portal-demo is a host binary; flash the firmware image instead.");
}
