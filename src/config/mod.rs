//! Configuration
//!
//! `AppConfig` comes from defaults, an optional JSON file and CLI overrides.
//! `ConfigStore` persists the one value that must survive restarts, the
//! bandwidth limit.

mod schema;
mod store;

pub use schema::{AppConfig, StreamConfig};
pub use store::{ConfigStore, BANDWIDTH_LIMIT_KEY};
