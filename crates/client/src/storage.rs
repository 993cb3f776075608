//! Persistent client-side storage.
//!
//! Values are stored as JSON files in the platform-appropriate config directory:
//!   - Linux: `~/.config/hms-live/`
//!   - macOS: `~/Library/Application Support/hms-live/`
//!   - Windows: `%APPDATA%\hms-live\`
//!
//! Only the binary reads from here. Library code receives credentials through
//! [`crate::ApiClient`] and [`crate::live::LiveOptions`] instead.

use serde::{de::DeserializeOwned, Serialize};

const APP_DIR: &str = "hms-live";

/// Storage key of the bearer token.
pub const TOKEN_KEY: &str = "token";

/// Save a value to persistent storage.
///
/// Returns `true` if the operation succeeded.
pub fn save<T: Serialize>(key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => save_raw(key, &json),
        Err(_) => false,
    }
}

/// Load a value from persistent storage.
///
/// Returns `None` if the key doesn't exist or deserialization fails.
pub fn load<T: DeserializeOwned>(key: &str) -> Option<T> {
    let json = load_raw(key)?;
    serde_json::from_str(&json).ok()
}

/// Remove a value from persistent storage.
pub fn remove(key: &str) {
    if let Some(path) = get_file_path(key) {
        let _ = std::fs::remove_file(path);
    }
}

/// Load the stored bearer token, if any.
pub fn load_token() -> Option<String> {
    load::<String>(TOKEN_KEY).filter(|t| !t.trim().is_empty())
}

fn get_config_dir() -> Option<std::path::PathBuf> {
    let config_dir = dirs::config_dir()?;
    let app_dir = config_dir.join(APP_DIR);

    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir).ok()?;
    }

    Some(app_dir)
}

/// Map a storage key to a safe file name.
fn file_name(key: &str) -> String {
    let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
    format!("{}.json", safe_key)
}

fn get_file_path(key: &str) -> Option<std::path::PathBuf> {
    Some(get_config_dir()?.join(file_name(key)))
}

fn save_raw(key: &str, value: &str) -> bool {
    let Some(path) = get_file_path(key) else {
        return false;
    };
    std::fs::write(path, value).is_ok()
}

fn load_raw(key: &str) -> Option<String> {
    let path = get_file_path(key)?;
    std::fs::read_to_string(path).ok()
}
