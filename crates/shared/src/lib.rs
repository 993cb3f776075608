//! Shared types and utilities for the hospital live-update client.

pub mod error;
pub mod models;
pub mod protocol;
pub mod validation;

pub use error::*;
pub use models::*;
pub use validation::{FieldError, Validate};
