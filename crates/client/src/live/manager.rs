//! Process-wide pool of bus connections, one per endpoint.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use once_cell::sync::Lazy;

use super::connection::{Connection, LiveOptions, WeakConnection};
use super::subscription::{LiveSubscription, TopicMap};
use super::transport::{Transport, WebSocketTransport};

static GLOBAL: Lazy<ConnectionManager> = Lazy::new(ConnectionManager::default);

/// Normalize an endpoint URL for use as a key
pub fn normalize_endpoint(url: &str) -> String {
    let url = url.trim();
    let normalized = match url::Url::parse(url) {
        Ok(parsed) => parsed.to_string(),
        Err(_) => url.to_string(),
    };
    normalized.trim_end_matches('/').to_string()
}

/// Shares bus connections between subscribers.
///
/// Connections are held weakly: one stays open while any subscription (or
/// other [`Connection`] handle) refers to it, and a fresh one is opened on the
/// next request after it went away. The options passed by the first caller
/// configure a connection for all later subscribers.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<String, WeakConnection>>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(Arc::new(WebSocketTransport))
    }
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide manager, using the WebSocket transport.
    pub fn global() -> &'static ConnectionManager {
        &GLOBAL
    }

    /// Get the connection for `url`, opening it if none is alive.
    pub fn connection(&self, url: &str, options: LiveOptions) -> Connection {
        let key = normalize_endpoint(url);
        let mut connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        connections.retain(|_, conn| conn.is_alive());

        if let Some(existing) = connections.get(&key).and_then(WeakConnection::upgrade) {
            crate::log_debug!("Reusing bus connection to {}", key);
            return existing;
        }

        crate::log_info!("Opening bus connection to {}", key);
        let connection = Connection::open(url.trim(), self.transport.clone(), options);
        connections.insert(key, connection.downgrade());
        connection
    }

    /// Subscribe `topics` on the shared connection for `url`.
    pub fn subscribe(&self, url: &str, topics: TopicMap, options: LiveOptions) -> LiveSubscription {
        self.connection(url, options).subscribe(topics)
    }

    pub fn subscriber_count(&self, url: &str) -> usize {
        let key = normalize_endpoint(url);
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .and_then(WeakConnection::upgrade)
            .map(|conn| conn.subscriber_count())
            .unwrap_or(0)
    }

    /// Endpoints with a live connection, sorted.
    pub fn active_endpoints(&self) -> Vec<String> {
        let connections = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut endpoints: Vec<String> = connections
            .iter()
            .filter(|(_, conn)| conn.is_alive())
            .map(|(key, _)| key.clone())
            .collect();
        endpoints.sort();
        endpoints
    }

    /// Disconnect every live connection.
    pub fn disconnect_all(&self) {
        let live: Vec<Connection> = self
            .connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(WeakConnection::upgrade)
            .collect();
        for connection in live {
            connection.disconnect();
        }
    }
}
