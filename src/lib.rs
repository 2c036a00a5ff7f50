#![doc = include_str!("../README.md")]

pub mod claims;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fingerprint;
pub mod manager;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports for convenient access
pub use claims::Claims;
pub use client::ApiClient;
pub use config::Config;
pub use credentials::{CredentialStore, Session};
pub use error::Error;
pub use fingerprint::{DeviceFingerprint, FingerprintHash};
pub use manager::SessionManager;
pub use scheduler::{RefreshScheduler, SessionEvent};
pub use settings::{
    CachedSetting, SettingUpdated, SettingValue, SettingsCache, SettingsEvent, SettingsService,
    SyncHub,
};
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use transport::{
    AuthTransport, LoginRequest, LoginResponse, RefreshResponse, RegisterRequest,
    SettingsTransport, UserProfile,
};
pub use types::{SectionPath, UserId};
