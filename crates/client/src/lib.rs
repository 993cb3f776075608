//! HMS Live Client - live-update and REST client for the hospital backend
//!
//! This crate contains the message-bus subscription layer, the REST client,
//! and domain stores for pharmacy, dialysis and laboratory data.

pub mod api_client;
pub mod config;
pub mod live;
pub mod logging;
pub mod storage;
pub mod stores;

pub use api_client::ApiClient;
pub use config::BackendConfig;
pub use live::{ConnectionManager, ConnectionState, LiveOptions, LiveSubscription, TopicMap};
