//! Token refresh scheduling.
//!
//! One deferred timer per session: armed whenever a token lands, fired
//! shortly before expiry, re-armed after every successful renewal. Failures
//! are classified: transient ones retry on a fixed delay a bounded number
//! of times, a 401 abandons the session at once. Background failures stay
//! silent to the user until retries exhaust; only then does a single
//! [`SessionEvent::SessionExpired`] surface and the credentials clear.
//!
//! All timer and retry state lives on the scheduler instance, constructed
//! once per session lifetime. Nothing is module-global.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::error::Error;
use crate::fingerprint;
use crate::settings::SettingsCache;
use crate::transport::AuthTransport;
use crate::types::SectionPath;

/// Settings location of the server-managed refresh margin override.
const MARGIN_SECTION: &str = "Application.Security";
const MARGIN_SETTING: &str = "token.refreshMargin";

/// Session lifecycle notifications for the embedding UI.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// A background token renewal succeeded.
    Refreshed { expires_at: OffsetDateTime },
    /// Renewal failed beyond recovery and the credentials were cleared.
    /// The UI should notify the user and return to the login entry point.
    SessionExpired,
    /// An explicit sign-out completed.
    LoggedOut,
}

/// Schedules background token renewal against an [`AuthTransport`].
///
/// Owned by [`SessionManager`](crate::manager::SessionManager); must be used
/// from within a Tokio runtime.
pub struct RefreshScheduler<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    credentials: Arc<CredentialStore>,
    transport: Arc<T>,
    settings: Option<Arc<SettingsCache>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    fallback_margin: Duration,
    retry_delay: Duration,
    max_retries: u32,
    retry_count: AtomicU32,
    timer: Mutex<Option<AbortHandle>>,
}

impl<T: AuthTransport> RefreshScheduler<T> {
    pub(crate) fn new(
        credentials: Arc<CredentialStore>,
        transport: Arc<T>,
        settings: Option<Arc<SettingsCache>>,
        events: mpsc::UnboundedSender<SessionEvent>,
        config: &Config,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                credentials,
                transport,
                settings,
                events,
                fallback_margin: config.refresh_margin,
                retry_delay: config.refresh_retry_delay,
                max_retries: config.refresh_max_retries.max(1),
                retry_count: AtomicU32::new(0),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Arm the refresh timer for the current session.
    ///
    /// Any prior timer is cancelled first, so at most one is ever pending
    /// and re-arming is idempotent. A token already at or past its refresh
    /// point fires immediately instead of sleeping a negative delay.
    /// Without a session this is a disarm.
    pub fn arm(&self) {
        Inner::arm(&self.inner);
    }

    /// Cancel any pending timer. A cancelled callback never runs, even if
    /// its deadline already passed.
    pub fn disarm(&self) {
        self.inner.disarm();
    }
}

impl<T> Drop for RefreshScheduler<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.inner.timer_slot().take() {
            handle.abort();
        }
    }
}

impl<T> Inner<T> {
    fn timer_slot(&self) -> std::sync::MutexGuard<'_, Option<AbortHandle>> {
        self.timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn disarm(&self) {
        if let Some(handle) = self.timer_slot().take() {
            handle.abort();
        }
    }

    /// Margin from server settings when fresh and sane, the configured
    /// fallback otherwise.
    fn margin(&self) -> Duration {
        let Some(cache) = &self.settings else {
            return self.fallback_margin;
        };
        let Ok(section) = MARGIN_SECTION.parse::<SectionPath>() else {
            return self.fallback_margin;
        };
        match cache
            .lookup(&section, MARGIN_SETTING)
            .and_then(|value| value.as_i64())
        {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64),
            _ => self.fallback_margin,
        }
    }
}

impl<T: AuthTransport> Inner<T> {
    fn arm(inner: &Arc<Self>) {
        let Some(expires_at) = inner.credentials.expires_at() else {
            inner.disarm();
            return;
        };

        let margin = inner.margin();
        let lead = (expires_at - OffsetDateTime::now_utc()).whole_seconds()
            - i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        let delay = if lead <= 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(lead as u64)
        };
        tracing::debug!(delay_secs = delay.as_secs(), "arming refresh timer");

        let task_inner = Arc::clone(inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task_inner.fire().await;
        });

        if let Some(old) = inner.timer_slot().replace(handle.abort_handle()) {
            old.abort();
        }
    }

    async fn fire(self: Arc<Self>) {
        loop {
            match self.attempt().await {
                Ok(expires_at) => {
                    self.retry_count.store(0, Ordering::Relaxed);
                    tracing::info!(
                        expires_at = expires_at.unix_timestamp(),
                        "token refreshed"
                    );
                    let _ = self.events.send(SessionEvent::Refreshed { expires_at });
                    Self::arm(&self);
                    return;
                }
                Err(err @ Error::Auth { .. }) => {
                    tracing::warn!(error = %err, "refresh rejected; abandoning session");
                    self.abandon();
                    return;
                }
                Err(err) if err.is_transient() => {
                    let attempt = self.retry_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if attempt >= self.max_retries {
                        tracing::error!(
                            error = %err,
                            attempts = attempt,
                            "refresh retries exhausted; abandoning session"
                        );
                        self.retry_count.store(0, Ordering::Relaxed);
                        self.abandon();
                        return;
                    }
                    tracing::warn!(error = %err, attempt, "refresh failed; retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    tracing::error!(error = %err, "refresh failed irrecoverably");
                    self.abandon();
                    return;
                }
            }
        }
    }

    async fn attempt(&self) -> Result<OffsetDateTime, Error> {
        let fingerprint = fingerprint::generate();
        let response = self.transport.refresh(&fingerprint).await?;
        let claims = self.credentials.update_from_token(&response.access_token)?;
        Ok(claims.expires_at)
    }

    fn abandon(&self) {
        if let Err(err) = self.credentials.clear() {
            tracing::warn!(error = %err, "failed to clear persisted session");
        }
        let _ = self.events.send(SessionEvent::SessionExpired);
    }
}
