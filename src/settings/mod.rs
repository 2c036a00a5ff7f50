//! Server-provided application settings.
//!
//! A five-minute read-through cache in front of the backend's hierarchical
//! configuration, plus optimistic debounced writes and best-effort
//! propagation of confirmed updates to sibling instances.

mod cache;
mod service;
mod sync;
mod types;

pub use cache::SettingsCache;
pub use service::{SettingsEvent, SettingsService};
pub use sync::{SettingUpdated, SyncHub};
pub use types::{CachedSetting, SettingValue};
