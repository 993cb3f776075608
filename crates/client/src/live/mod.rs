//! Live updates from the hospital message bus.
//!
//! This module provides:
//! - STOMP-over-WebSocket connections with auto-reconnect
//! - Topic maps routing each topic to one handler
//! - A shared connection manager, one connection per endpoint
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ LiveSubscription │ │ LiveSubscription │ │ LiveSubscription │
//! │ (prescriptions)  │ │ (inventory)      │ │ (lab requests)   │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!          │                    │                    │
//!          └────────────────────┼────────────────────┘
//!                               ▼
//!                     ┌───────────────────┐
//!                     │ ConnectionManager │
//!                     └───────────────────┘
//!                               │
//!                               ▼
//!                     ┌───────────────────┐   commands   ┌────────┐
//!                     │    Connection     │ ───────────▶ │ Driver │ ◀──▶ broker
//!                     │  (cloneable)      │ ◀─────────── │ (task) │
//!                     └───────────────────┘  state watch └────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let topics = TopicMap::new().on("/topic/pharmacy/prescriptions", |payload| {
//!     println!("prescription changed: {payload}");
//! });
//! let sub = live::connect(&config.bus_url(), topics, LiveOptions::default());
//! sub.send_message("/app/pharmacy/ping", &serde_json::json!({}), &[]);
//! ```

mod connection;
mod manager;
mod subscription;
mod transport;

use std::sync::Arc;

pub use connection::{Connection, ConnectionState, LiveOptions, ReconnectConfig};
pub use manager::{normalize_endpoint, ConnectionManager};
pub use subscription::{Handler, LiveSubscription, TopicMap};
pub use transport::{TextSink, TextStream, Transport, TransportChannel, WebSocketTransport};

/// Open a dedicated WebSocket connection to `url` and subscribe `topics`.
///
/// Must be called from within a Tokio runtime.
pub fn connect(url: &str, topics: TopicMap, options: LiveOptions) -> LiveSubscription {
    connect_with(Arc::new(WebSocketTransport), url, topics, options)
}

/// Like [`connect`], over a caller-supplied transport.
pub fn connect_with(
    transport: Arc<dyn Transport>,
    url: &str,
    topics: TopicMap,
    options: LiveOptions,
) -> LiveSubscription {
    Connection::open(url, transport, options).subscribe(topics)
}
