//! Domain state fed by REST snapshots and live changes.

pub mod analytics;
pub mod collection;
pub mod domains;

pub use analytics::DialysisAnalytics;
pub use collection::{Collection, Record};
pub use domains::{Domain, LiveCollection};
