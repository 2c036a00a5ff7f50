use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::scheduler::{RefreshScheduler, SessionEvent};
use crate::settings::SettingsCache;
use crate::store::KeyValueStore;
use crate::transport::{AuthTransport, LoginRequest, UserProfile};

/// Drives the authenticated session for one client instance.
///
/// Owns the [`CredentialStore`] and the [`RefreshScheduler`], arms the
/// scheduler whenever a token lands, and surfaces [`SessionEvent`]s for the
/// embedding UI to turn into notifications and navigation.
///
/// Must be used from within a Tokio runtime.
pub struct SessionManager<T> {
    credentials: Arc<CredentialStore>,
    scheduler: RefreshScheduler<T>,
    transport: Arc<T>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl<T: AuthTransport> SessionManager<T> {
    /// Build a manager.
    ///
    /// `settings`, when given, lets the scheduler read the server-managed
    /// refresh margin; without it the configured fallback applies.
    pub fn new(
        config: &Config,
        transport: Arc<T>,
        store: Arc<dyn KeyValueStore>,
        settings: Option<Arc<SettingsCache>>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let credentials = Arc::new(CredentialStore::new(store, config.session_key.clone()));
        let scheduler = RefreshScheduler::new(
            Arc::clone(&credentials),
            Arc::clone(&transport),
            settings,
            events.clone(),
            config,
        );
        (
            Self {
                credentials,
                scheduler,
                transport,
                events,
            },
            events_rx,
        )
    }

    /// Restore a persisted session at process start.
    ///
    /// A restored session re-arms the refresh timer; one already past its
    /// refresh point triggers an immediate renewal attempt through the same
    /// arming path. Returns whether a session was installed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the persisted state cannot be read.
    pub fn restore(&self) -> Result<bool, Error> {
        if self.credentials.restore()? {
            self.scheduler.arm();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Authenticate and start the refresh cycle.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] for rejected credentials, [`Error::Decode`]
    /// if the backend hands back a malformed token, or the usual transport
    /// failures.
    pub async fn login(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<UserProfile, Error> {
        let request = LoginRequest {
            username: username.into(),
            password: password.into(),
        };
        let response = self.transport.login(&request).await?;
        self.credentials.set_from_token(&response.access_token)?;
        self.scheduler.arm();
        tracing::info!(user = %response.user.username, "login successful");
        Ok(response.user)
    }

    /// End the session.
    ///
    /// Backend sign-out is best-effort (a failure is logged, not surfaced);
    /// the pending refresh timer always cancels and local state always
    /// clears.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the persisted session cannot be
    /// removed; the in-memory session is cleared regardless.
    pub async fn logout(&self) -> Result<(), Error> {
        if let Err(err) = self.transport.logout().await {
            tracing::warn!(error = %err, "backend logout failed; clearing local session anyway");
        }
        self.scheduler.disarm();
        let result = self.credentials.clear();
        let _ = self.events.send(SessionEvent::LoggedOut);
        tracing::info!("logged out");
        result
    }

    /// Install a token obtained out of band (single-sign-on hand-off) and
    /// arm the refresh cycle for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for malformed tokens.
    pub fn set_token(&self, token: &str) -> Result<(), Error> {
        self.credentials.set_from_token(token)?;
        self.scheduler.arm();
        Ok(())
    }

    /// The credential store backing this session.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Shared handle to the credential store, for wiring into an
    /// [`ApiClient`](crate::client::ApiClient).
    #[must_use]
    pub fn credentials_handle(&self) -> Arc<CredentialStore> {
        Arc::clone(&self.credentials)
    }

    /// Whether a signed-in session is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.credentials.is_authenticated()
    }
}
