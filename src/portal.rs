//! Web-based WiFi provisioning routes.
//!
//! Registers the captive-portal routes on a [`Router`]: the provisioning
//! form on `/` (plus the Apple and Android connectivity-check paths), and
//! `POST /configure`, which validates the submitted credentials, writes them
//! through the credential store, and schedules a delayed restart so the
//! response still reaches the client.
//!
//! Restarting is an external collaborator action, so it is injected as a
//! hook; the default hook only logs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::{validate_passphrase, validate_ssid};
use crate::http::{HandlerResult, HttpRequest, Method, RouteHandler, Router};
use crate::store::CredentialStore;

/// Delay between a successful submission and the restart hook firing,
/// leaving time for the success page to be delivered.
const RESTART_DELAY: Duration = Duration::from_secs(3);

/// Restart action invoked after credentials are saved.
pub type RestartFn = Arc<dyn Fn() + Send + Sync>;

/// Notification invoked with (ssid, password) after a successful save.
pub type SavedFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// External actions the portal triggers.
#[derive(Clone)]
pub struct PortalHooks {
    /// Called after the save is verified.
    pub on_saved: Option<SavedFn>,
    /// Called [`RESTART_DELAY`] after a successful save.
    pub restart: RestartFn,
}

impl Default for PortalHooks {
    fn default() -> Self {
        Self {
            on_saved: None,
            restart: Arc::new(|| {
                warn!("Restart requested but no restart hook is installed");
            }),
        }
    }
}

/// Provisioning route handlers.
pub struct ProvisioningHandler {
    store: CredentialStore,
    hooks: PortalHooks,
    template_dir: PathBuf,
}

impl ProvisioningHandler {
    pub fn new(store: CredentialStore, hooks: PortalHooks) -> Self {
        Self {
            store,
            hooks,
            template_dir: PathBuf::from("templates"),
        }
    }

    /// Override the directory templates are loaded from.
    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = dir.into();
        self
    }

    /// Register the provisioning routes. Consumes the handler; the routes
    /// share it from then on.
    pub fn register_routes(self, router: &mut Router) {
        let this = Arc::new(self);

        let form: RouteHandler = {
            let this = this.clone();
            Arc::new(move |request: &HttpRequest| this.handle_root(request))
        };
        router.add_route("/", Method::Get, form.clone());
        // Apple captive portal detection
        router.add_route("/hotspot-detect.html", Method::Get, form.clone());
        // Android captive portal detection
        router.add_route("/generate_204", Method::Get, form);

        let configure: RouteHandler = {
            let this = this.clone();
            Arc::new(move |request: &HttpRequest| this.handle_configure(request))
        };
        router.add_route("/configure", Method::Post, configure);
    }

    fn handle_root(&self, _request: &HttpRequest) -> HandlerResult {
        Ok(html_response(200, &self.read_template("provision")))
    }

    fn handle_configure(&self, request: &HttpRequest) -> HandlerResult {
        info!("Received configure request");
        let ssid = request.param("ssid").unwrap_or("").trim();
        let password = request.param("password").unwrap_or("");

        if let Err(e) = validate_ssid(ssid) {
            warn!("Invalid SSID submitted: {}", e);
            return Ok(bad_request("Invalid SSID (must be 1-32 characters)"));
        }
        if let Err(e) = validate_passphrase(password) {
            warn!("Invalid password submitted: {}", e);
            return Ok(bad_request(
                "Invalid password (must be 8-63 characters or empty)",
            ));
        }

        let saved = self.store.save(ssid, password);
        info!("Credentials saved = {}", saved);
        if !saved {
            return Ok(server_error("Failed to save configuration"));
        }

        if let Some(on_saved) = &self.hooks.on_saved {
            on_saved(ssid, password);
        }
        schedule_restart(self.hooks.restart.clone());
        Ok(html_response(200, &self.read_template("success")))
    }

    /// Load a template by name from the template directory.
    ///
    /// Names are restricted to alphanumerics and underscore so a crafted
    /// form can never traverse out of the directory. A missing template
    /// degrades to explanatory text rather than a failed request.
    fn read_template(&self, name: &str) -> String {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            warn!("Invalid template name: {}", name);
            return "Error: Invalid template name".to_string();
        }
        let path = self.template_dir.join(format!("{}.html", name));
        match std::fs::read_to_string(&path) {
            Ok(html) => html,
            Err(_) => {
                warn!("Template not found: {:?}", path);
                format!("Error: Template {} not found", name)
            }
        }
    }
}

/// Fire the restart hook after [`RESTART_DELAY`], off the request path.
fn schedule_restart(restart: RestartFn) {
    info!("Restarting in {} seconds...", RESTART_DELAY.as_secs());
    tokio::spawn(async move {
        tokio::time::sleep(RESTART_DELAY).await;
        restart();
    });
}

/// A complete HTML response.
fn html_response(status: u16, html: &str) -> Vec<u8> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "OK",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/html\r\n\r\n{}",
        status, reason, html
    )
    .into_bytes()
}

fn bad_request(text: &str) -> Vec<u8> {
    format!("HTTP/1.1 400 Bad Request\r\n\r\n{}", text).into_bytes()
}

fn server_error(text: &str) -> Vec<u8> {
    format!("HTTP/1.1 500 Internal Server Error\r\n\r\n{}", text).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::http::request::parse_form;

    static TEST_COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct Fixture {
        handler: ProvisioningHandler,
        store: CredentialStore,
        restarts: Arc<AtomicUsize>,
        dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = env::temp_dir().join(format!("picore-portal-{}-{}", std::process::id(), id));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("provision.html"), "<html>form</html>").unwrap();
        fs::write(dir.join("success.html"), "<html>saved</html>").unwrap();

        let store = CredentialStore::new(dir.join("wifi_config.json"));
        let restarts = Arc::new(AtomicUsize::new(0));
        let hook_restarts = restarts.clone();
        let hooks = PortalHooks {
            on_saved: None,
            restart: Arc::new(move || {
                hook_restarts.fetch_add(1, Ordering::SeqCst);
            }),
        };
        let handler =
            ProvisioningHandler::new(store.clone(), hooks).with_template_dir(&dir);
        Fixture {
            handler,
            store,
            restarts,
            dir,
        }
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest {
            method: Method::Get,
            path: path.to_string(),
            headers: HashMap::new(),
            body: String::new(),
            params: HashMap::new(),
        }
    }

    fn post_configure(body: &str) -> HttpRequest {
        HttpRequest {
            method: Method::Post,
            path: "/configure".to_string(),
            headers: HashMap::new(),
            body: body.to_string(),
            params: parse_form(body),
        }
    }

    fn status_of(response: &[u8]) -> &str {
        let text = std::str::from_utf8(response).unwrap();
        text.split_whitespace().nth(1).unwrap()
    }

    #[tokio::test]
    async fn test_root_serves_form() {
        let fx = fixture();
        let response = fx.handler.handle_root(&get("/")).unwrap();
        assert_eq!(status_of(&response), "200");
        assert!(std::str::from_utf8(&response).unwrap().ends_with("<html>form</html>"));
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_missing_template_degrades() {
        let fx = fixture();
        fs::remove_file(fx.dir.join("provision.html")).unwrap();
        let response = fx.handler.handle_root(&get("/")).unwrap();
        assert_eq!(status_of(&response), "200");
        assert!(std::str::from_utf8(&response)
            .unwrap()
            .contains("Template provision not found"));
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[test]
    fn test_template_name_restriction() {
        let fx = fixture();
        assert_eq!(
            fx.handler.read_template("../../../etc/passwd"),
            "Error: Invalid template name"
        );
        assert_eq!(fx.handler.read_template(""), "Error: Invalid template name");
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_valid_saves_and_schedules_restart() {
        let fx = fixture();
        let response = fx
            .handler
            .handle_configure(&post_configure("ssid=Home&password=letmein123"))
            .unwrap();
        assert_eq!(status_of(&response), "200");
        assert_eq!(
            fx.store.credentials(),
            Some(("Home".to_string(), "letmein123".to_string()))
        );

        // Restart fires only after the delay
        assert_eq!(fx.restarts.load(Ordering::SeqCst), 0);
        tokio::time::sleep(RESTART_DELAY + Duration::from_millis(200)).await;
        assert_eq!(fx.restarts.load(Ordering::SeqCst), 1);
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_empty_password_is_valid() {
        let fx = fixture();
        let response = fx
            .handler
            .handle_configure(&post_configure("ssid=Home&password="))
            .unwrap();
        assert_eq!(status_of(&response), "200");
        assert_eq!(
            fx.store.credentials(),
            Some(("Home".to_string(), String::new()))
        );
        tokio::time::sleep(RESTART_DELAY + Duration::from_millis(200)).await;
        assert_eq!(fx.restarts.load(Ordering::SeqCst), 1);
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_configure_rejects_long_ssid() {
        let fx = fixture();
        let body = format!("ssid={}&password=letmein123", "a".repeat(33));
        let response = fx.handler.handle_configure(&post_configure(&body)).unwrap();
        assert_eq!(status_of(&response), "400");
        assert!(fx.store.credentials().is_none());
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_configure_rejects_short_password() {
        let fx = fixture();
        let response = fx
            .handler
            .handle_configure(&post_configure("ssid=Home&password=12345"))
            .unwrap();
        assert_eq!(status_of(&response), "400");
        assert!(fx.store.credentials().is_none());
        assert_eq!(fx.restarts.load(Ordering::SeqCst), 0);
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_configure_missing_ssid_rejected() {
        let fx = fixture();
        let response = fx
            .handler
            .handle_configure(&post_configure("password=letmein123"))
            .unwrap();
        assert_eq!(status_of(&response), "400");
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_configure_trims_ssid() {
        let fx = fixture();
        let response = fx
            .handler
            .handle_configure(&post_configure("ssid=+Home+&password=letmein123"))
            .unwrap();
        assert_eq!(status_of(&response), "200");
        assert_eq!(
            fx.store.credentials().map(|(ssid, _)| ssid),
            Some("Home".to_string())
        );
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_configure_storage_failure_is_500() {
        let fx = fixture();
        let broken = ProvisioningHandler::new(
            CredentialStore::new("/nonexistent-dir/wifi_config.json"),
            PortalHooks {
                on_saved: None,
                restart: fx.handler.hooks.restart.clone(),
            },
        )
        .with_template_dir(&fx.dir);
        let response = broken
            .handle_configure(&post_configure("ssid=Home&password=letmein123"))
            .unwrap();
        assert_eq!(status_of(&response), "500");
        assert_eq!(fx.restarts.load(Ordering::SeqCst), 0);
        let _ = fs::remove_dir_all(&fx.dir);
    }

    #[tokio::test]
    async fn test_saved_hook_receives_credentials() {
        let fx = fixture();
        let seen: Arc<Mutex<Option<(String, String)>>> = Arc::new(Mutex::new(None));
        let hook_seen = seen.clone();
        let hooks = PortalHooks {
            on_saved: Some(Arc::new(move |ssid: &str, password: &str| {
                *hook_seen.lock().unwrap() = Some((ssid.to_string(), password.to_string()));
            })),
            restart: Arc::new(|| {}),
        };
        let handler =
            ProvisioningHandler::new(fx.store.clone(), hooks).with_template_dir(&fx.dir);
        handler
            .handle_configure(&post_configure("ssid=Home&password=letmein123"))
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            Some(("Home".to_string(), "letmein123".to_string()))
        );
        let _ = fs::remove_dir_all(&fx.dir);
    }
}
