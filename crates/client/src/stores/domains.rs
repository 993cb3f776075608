//! Domain collections kept current by the message bus.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use hms_shared::{
    ApiError, Change, DialysisMachine, DialysisSession, Drug, InventoryItem, LabRequest,
    Prescription,
};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;

use super::collection::{Collection, Record};
use crate::api_client::ApiClient;
use crate::live::{Connection, ConnectionState, LiveSubscription, TopicMap};

/// An entity with a REST collection and a live topic.
pub trait Domain: Record + Serialize + DeserializeOwned + fmt::Debug {
    /// Human-readable name used in logs
    const NAME: &'static str;
    const COLLECTION_PATH: &'static str;
    /// Topic carrying [`Change`]s for this entity
    const TOPIC: &'static str;
}

impl Domain for Prescription {
    const NAME: &'static str = "prescriptions";
    const COLLECTION_PATH: &'static str = "/api/pharmacy/prescriptions";
    const TOPIC: &'static str = "/topic/pharmacy/prescriptions";
}

impl Domain for InventoryItem {
    const NAME: &'static str = "inventory";
    const COLLECTION_PATH: &'static str = "/api/pharmacy/inventory";
    const TOPIC: &'static str = "/topic/pharmacy/inventory";
}

impl Domain for Drug {
    const NAME: &'static str = "drugs";
    const COLLECTION_PATH: &'static str = "/api/pharmacy/drugs";
    const TOPIC: &'static str = "/topic/pharmacy/drugs";
}

impl Domain for DialysisSession {
    const NAME: &'static str = "dialysis sessions";
    const COLLECTION_PATH: &'static str = "/api/dialysis/sessions";
    const TOPIC: &'static str = "/topic/dialysis/sessions";
}

impl Domain for DialysisMachine {
    const NAME: &'static str = "dialysis machines";
    const COLLECTION_PATH: &'static str = "/api/dialysis/machines";
    const TOPIC: &'static str = "/topic/dialysis/machines";
}

impl Domain for LabRequest {
    const NAME: &'static str = "lab requests";
    const COLLECTION_PATH: &'static str = "/api/lab/requests";
    const TOPIC: &'static str = "/topic/lab/requests";
}

struct Store<T> {
    collection: Mutex<Collection<T>>,
    version: watch::Sender<u64>,
    snapshot_error: Mutex<Option<ApiError>>,
}

impl<T: Record> Store<T> {
    fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            collection: Mutex::new(Collection::new()),
            version,
            snapshot_error: Mutex::new(None),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Collection<T>) -> bool) {
        let changed = f(&mut self.collection.lock().unwrap_or_else(PoisonError::into_inner));
        if changed {
            self.version.send_modify(|v| *v += 1);
        }
    }

    fn set_error(&self, error: Option<ApiError>) {
        *self
            .snapshot_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    fn read<R>(&self, f: impl FnOnce(&Collection<T>) -> R) -> R {
        f(&self.collection.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// A collection loaded over REST and patched by live changes.
///
/// The topic is subscribed before the snapshot is requested, so changes made
/// while the request is in flight are not lost.
pub struct LiveCollection<T: Domain> {
    store: Arc<Store<T>>,
    subscription: LiveSubscription,
}

impl<T: Domain> LiveCollection<T> {
    fn subscribe(connection: &Connection) -> Self {
        let store = Arc::new(Store::<T>::new());
        let sink = store.clone();
        let topics = TopicMap::new().on_json::<Change<T>, _>(T::TOPIC, move |change| {
            sink.update(|collection| collection.apply(change));
        });
        Self {
            store,
            subscription: connection.subscribe(topics),
        }
    }

    /// Subscribe to the entity's topic, then load the snapshot.
    pub async fn start(api: &ApiClient, connection: &Connection) -> Result<Self, ApiError> {
        let live = Self::subscribe(connection);
        let snapshot = api.list::<T>().await?;
        live.store.update(|collection| {
            collection.set_snapshot(snapshot);
            true
        });
        Ok(live)
    }

    /// Like [`start`](Self::start), but falls back to `fallback` when the
    /// snapshot can't be loaded. The error stays available through
    /// [`snapshot_error`](Self::snapshot_error).
    pub async fn start_with_fallback(
        api: &ApiClient,
        connection: &Connection,
        fallback: Vec<T>,
    ) -> Self {
        let live = Self::subscribe(connection);
        let snapshot = match api.list::<T>().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                crate::log_warn!("Failed to load {}: {}. Using fallback data", T::NAME, e);
                live.store.set_error(Some(e));
                fallback
            }
        };
        live.store.update(|collection| {
            collection.set_snapshot(snapshot);
            true
        });
        live
    }

    /// Reload the snapshot, replacing the current contents.
    pub async fn refresh(&self, api: &ApiClient) -> Result<(), ApiError> {
        match api.list::<T>().await {
            Ok(snapshot) => {
                self.store.set_error(None);
                self.store.update(|collection| {
                    collection.replace(snapshot);
                    true
                });
                Ok(())
            }
            Err(e) => {
                crate::log_error!("Failed to refresh {}: {}", T::NAME, e);
                self.store.set_error(Some(e.clone()));
                Err(e)
            }
        }
    }

    pub fn items(&self) -> Vec<T> {
        self.store.read(Collection::items)
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.store.read(|collection| collection.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.store.read(Collection::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.store.read(|collection| collection.is_loaded)
    }

    /// Incremented on every change.
    pub fn version(&self) -> u64 {
        *self.store.version.borrow()
    }

    pub fn watch_version(&self) -> watch::Receiver<u64> {
        self.store.version.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.subscription.state()
    }

    /// Error from the last failed snapshot load, if any.
    pub fn snapshot_error(&self) -> Option<ApiError> {
        self.store
            .snapshot_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscription(&self) -> &LiveSubscription {
        &self.subscription
    }
}
