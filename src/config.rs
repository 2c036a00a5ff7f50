use std::time::Duration;

use url::Url;

use crate::error::Error;

/// Seconds before expiry at which a refresh fires, absent a server override.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Fixed delay between refresh retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Refresh attempts per firing before the session is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Cached settings sections are treated as absent after this long.
pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(5 * 60);

/// Quiet window that coalesces rapid setting edits into one backend write.
pub const DEFAULT_WRITE_DEBOUNCE: Duration = Duration::from_millis(750);

/// Key under which the serialized session is persisted.
pub const DEFAULT_SESSION_KEY: &str = "opsboard.session";

/// Client configuration for one Opsboard backend.
///
/// The required field (`base_url`) is a constructor parameter, so a
/// missing backend URL cannot surface at runtime. Everything else defaults
/// sensibly.
///
/// ```rust,ignore
/// use opsboard_client::Config;
///
/// let config = Config::new("https://console.example.com/api/".parse()?)
///     .with_refresh_margin(std::time::Duration::from_secs(120));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    pub(crate) base_url: Url,
    pub(crate) refresh_margin: Duration,
    pub(crate) refresh_retry_delay: Duration,
    pub(crate) refresh_max_retries: u32,
    pub(crate) settings_ttl: Duration,
    pub(crate) write_debounce: Duration,
    pub(crate) session_key: String,
}

impl Config {
    /// Create a configuration pointing at the given backend base URL.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            refresh_retry_delay: DEFAULT_RETRY_DELAY,
            refresh_max_retries: DEFAULT_MAX_RETRIES,
            settings_ttl: DEFAULT_SETTINGS_TTL,
            write_debounce: DEFAULT_WRITE_DEBOUNCE,
            session_key: DEFAULT_SESSION_KEY.into(),
        }
    }

    /// Create a configuration from environment variables.
    ///
    /// # Required env vars
    /// - `OPSBOARD_BASE_URL`: backend base URL
    ///
    /// # Optional env vars
    /// - `OPSBOARD_REFRESH_MARGIN_SECS`: fallback refresh margin
    /// - `OPSBOARD_SESSION_KEY`: storage key for the persisted session
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or a
    /// value does not parse.
    pub fn from_env() -> Result<Self, Error> {
        let base_url = std::env::var("OPSBOARD_BASE_URL")
            .map_err(|_| Error::Config("OPSBOARD_BASE_URL is required".into()))?;
        let base_url: Url = base_url
            .parse()
            .map_err(|e| Error::Config(format!("OPSBOARD_BASE_URL: {e}")))?;

        let mut config = Self::new(base_url);

        if let Ok(margin) = std::env::var("OPSBOARD_REFRESH_MARGIN_SECS") {
            let secs: u64 = margin
                .parse()
                .map_err(|e| Error::Config(format!("OPSBOARD_REFRESH_MARGIN_SECS: {e}")))?;
            config = config.with_refresh_margin(Duration::from_secs(secs));
        }
        if let Ok(key) = std::env::var("OPSBOARD_SESSION_KEY") {
            config = config.with_session_key(key);
        }

        Ok(config)
    }

    /// Fallback seconds-before-expiry margin, used when the server settings
    /// do not supply one.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Fixed delay between refresh retries.
    #[must_use]
    pub fn with_refresh_retry_delay(mut self, delay: Duration) -> Self {
        self.refresh_retry_delay = delay;
        self
    }

    /// Refresh attempts per firing before the session is abandoned.
    #[must_use]
    pub fn with_refresh_max_retries(mut self, retries: u32) -> Self {
        self.refresh_max_retries = retries;
        self
    }

    /// Time-to-live for cached settings sections.
    #[must_use]
    pub fn with_settings_ttl(mut self, ttl: Duration) -> Self {
        self.settings_ttl = ttl;
        self
    }

    /// Quiet window for coalescing setting edits.
    #[must_use]
    pub fn with_write_debounce(mut self, debounce: Duration) -> Self {
        self.write_debounce = debounce;
        self
    }

    /// Storage key for the persisted session.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    /// Backend base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}
