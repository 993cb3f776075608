//! Topic maps and the per-consumer subscription handle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use super::connection::{Connection, ConnectionState};

/// Callback invoked with the decoded JSON body of a message.
pub type Handler = Arc<dyn Fn(Value) + Send + Sync>;

/// Topic path to handler, fixed for the lifetime of a subscription.
#[derive(Clone, Default)]
pub struct TopicMap {
    entries: BTreeMap<String, Handler>,
}

impl fmt::Debug for TopicMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.keys()).finish()
    }
}

impl TopicMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for raw JSON payloads on `topic`.
    ///
    /// A second registration for the same topic replaces the first.
    pub fn on<F>(mut self, topic: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.entries.insert(topic.into(), Arc::new(handler));
        self
    }

    /// Register a typed handler. Payloads that don't decode as `T` are logged
    /// and dropped.
    pub fn on_json<T, F>(self, topic: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let name = topic.clone();
        self.on(topic, move |value| match serde_json::from_value::<T>(value) {
            Ok(payload) => handler(payload),
            Err(e) => crate::log_error!("Discarding payload on {}: {}", name, e),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &Handler)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

struct Lease {
    ids: Vec<String>,
    active: Arc<AtomicBool>,
}

/// One consumer's view of a bus connection.
///
/// Holds a lease on the connection for as long as it is attached. Dropping it
/// (or calling [`disconnect`](Self::disconnect)) stops handler delivery at once
/// and unsubscribes its topics; the connection closes when its last
/// subscription goes away.
pub struct LiveSubscription {
    connection: Connection,
    topics: TopicMap,
    lease: Mutex<Option<Lease>>,
}

impl fmt::Debug for LiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscription")
            .field("endpoint", &self.connection.endpoint())
            .field("topics", &self.topics)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl LiveSubscription {
    pub(crate) fn attach(connection: Connection, topics: TopicMap) -> Self {
        let subscription = Self {
            connection,
            topics,
            lease: Mutex::new(None),
        };
        subscription.acquire();
        subscription
    }

    fn acquire(&self) {
        let mut lease = self.lease.lock().unwrap_or_else(PoisonError::into_inner);
        if lease.is_some() {
            return;
        }
        let active = Arc::new(AtomicBool::new(true));
        let ids = self
            .topics
            .iter()
            .map(|(topic, handler)| self.connection.register(topic, handler.clone(), active.clone()))
            .collect();
        *lease = Some(Lease { ids, active });
        self.connection.retain();
    }

    fn release(&self) {
        let Some(lease) = self
            .lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        lease.active.store(false, Ordering::SeqCst);
        for id in lease.ids {
            self.connection.unregister(id);
        }
        self.connection.release();
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    /// Whether this subscription currently holds its topics on the connection.
    pub fn is_attached(&self) -> bool {
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_attached() {
            self.connection.state()
        } else {
            ConnectionState::Disconnected
        }
    }

    /// State changes of the underlying connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn is_connected(&self) -> bool {
        self.is_attached() && self.connection.is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    /// Publish `body` as JSON to `destination`. Returns `false` and sends
    /// nothing when not connected.
    pub fn send_message<T: Serialize + ?Sized>(
        &self,
        destination: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> bool {
        if !self.is_attached() {
            crate::log_warn!(
                "Subscription is disconnected, dropping message for {}",
                destination
            );
            return false;
        }
        self.connection.send_message(destination, body, headers)
    }

    /// Stop receiving messages and release the connection. Idempotent.
    pub fn disconnect(&self) {
        self.release();
    }

    /// Re-attach the topic map if needed and ask the connection to connect again.
    pub fn reconnect(&self) {
        self.acquire();
        self.connection.reconnect();
    }
}

impl Drop for LiveSubscription {
    fn drop(&mut self) {
        self.release();
    }
}
