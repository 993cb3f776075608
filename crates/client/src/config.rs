//! Backend location, resolved at runtime.
//!
//! The backend origin follows the host the client was served from, so the same
//! build works on every ward machine. Resolution order:
//!
//! 1. the page host (`HMS_PAGE_HOST`), with its port replaced by [`BACKEND_PORT`];
//! 2. an explicit override (`HMS_BACKEND_URL`), used verbatim;
//! 3. [`DEFAULT_BACKEND_ORIGIN`].

use url::Url;

pub const DEFAULT_BACKEND_ORIGIN: &str = "http://localhost:8080";
pub const BACKEND_PORT: u16 = 8080;

/// Path of the message-bus endpoint (a SockJS endpoint on the backend).
pub const BUS_PATH: &str = "/ws";

pub const ENV_PAGE_HOST: &str = "HMS_PAGE_HOST";
pub const ENV_BACKEND_URL: &str = "HMS_BACKEND_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    origin: String,
}

impl BackendConfig {
    /// Use `origin` as-is (trailing slashes removed).
    pub fn new(origin: impl AsRef<str>) -> Self {
        Self {
            origin: origin.as_ref().trim().trim_end_matches('/').to_string(),
        }
    }

    pub fn resolve(page_host: Option<&str>, override_origin: Option<&str>) -> Self {
        if let Some(origin) = page_host.and_then(origin_from_page_host) {
            return Self { origin };
        }
        if let Some(origin) = override_origin.filter(|o| !o.trim().is_empty()) {
            return Self::new(origin);
        }
        Self::new(DEFAULT_BACKEND_ORIGIN)
    }

    /// Resolve from environment variables.
    pub fn from_env() -> Self {
        let page_host = std::env::var(ENV_PAGE_HOST).ok();
        let override_origin = std::env::var(ENV_BACKEND_URL).ok();
        Self::resolve(page_host.as_deref(), override_origin.as_deref())
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Absolute URL for an API path.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!("{}/{}", self.origin, path.trim_start_matches('/'))
    }

    /// WebSocket URL of the message bus.
    ///
    /// The bus is a SockJS endpoint; its raw WebSocket transport lives under
    /// `{BUS_PATH}/websocket`.
    pub fn bus_url(&self) -> String {
        let base = self
            .origin
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}{}/websocket", base, BUS_PATH)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_ORIGIN)
    }
}

/// Build the backend origin from the host the client was served from.
///
/// Accepts either a bare host (`ward3.hospital.local`, optionally with a port)
/// or a full origin (`https://ward3.hospital.local:3000`).
fn origin_from_page_host(page_host: &str) -> Option<String> {
    let page_host = page_host.trim();
    if page_host.is_empty() {
        return None;
    }
    let with_scheme = if page_host.contains("://") {
        page_host.to_string()
    } else {
        format!("http://{page_host}")
    };
    let url = Url::parse(&with_scheme).ok()?;
    let host = url.host_str()?;
    let host = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    Some(format!("{}://{}:{}", url.scheme(), host, BACKEND_PORT))
}
