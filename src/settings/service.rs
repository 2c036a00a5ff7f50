use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::cache::SettingsCache;
use super::sync::{SettingUpdated, SyncHandle, SyncHub};
use super::types::{CachedSetting, SettingValue};
use crate::config::Config;
use crate::error::Error;
use crate::transport::SettingsTransport;
use crate::types::SectionPath;

/// Notifications surfaced to the embedding UI by settings flows.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum SettingsEvent {
    /// A staged write was rejected by the backend. The optimistic edit was
    /// rolled back to the value captured before the edit burst began.
    WriteFailed {
        section_path: SectionPath,
        name: String,
        reason: String,
    },
}

/// Read-through settings access with optimistic, debounced writes.
///
/// Reads consult the TTL cache before touching the network. Edits apply to
/// the cache synchronously and reach the backend once per quiet window, so
/// a slider or text field hammering [`SettingsService::stage_update`] costs
/// one call. Confirmed writes are announced to sibling instances through
/// the [`SyncHub`]; failed ones roll back and emit [`SettingsEvent`].
///
/// Must be used from within a Tokio runtime.
pub struct SettingsService<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    transport: Arc<T>,
    cache: Arc<SettingsCache>,
    sync: SyncHandle,
    events: mpsc::UnboundedSender<SettingsEvent>,
    debounce: Duration,
    pending: Mutex<HashMap<(SectionPath, String), PendingWrite>>,
}

struct PendingWrite {
    /// Value before the first edit of the burst; restored on failure.
    original: SettingValue,
    latest: SettingValue,
    timer: AbortHandle,
}

impl<T: SettingsTransport> SettingsService<T> {
    pub fn new(
        transport: Arc<T>,
        hub: &SyncHub,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<SettingsEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let service = Self {
            inner: Arc::new(Inner {
                transport,
                cache: Arc::new(SettingsCache::with_ttl(config.settings_ttl)),
                sync: hub.register(),
                events,
                debounce: config.write_debounce,
                pending: Mutex::new(HashMap::new()),
            }),
        };
        (service, events_rx)
    }

    /// The cache behind this service. Shared with the refresh scheduler so
    /// it can read server-managed margins.
    #[must_use]
    pub fn cache(&self) -> Arc<SettingsCache> {
        Arc::clone(&self.inner.cache)
    }

    /// Start applying updates announced by sibling instances. Idempotent;
    /// returns whether this call performed the subscription.
    pub fn init_sync(&self) -> bool {
        self.inner.sync.init_sync(Arc::clone(&self.inner.cache))
    }

    /// Settings for a section: from cache when fresh, otherwise fetched and
    /// cached.
    ///
    /// # Errors
    ///
    /// Propagates transport failures ([`Error::Network`], [`Error::Auth`],
    /// [`Error::Server`], ...) from the fetch; cache hits cannot fail.
    pub async fn get(&self, section: &SectionPath) -> Result<Vec<CachedSetting>, Error> {
        if let Some(settings) = self.inner.cache.get(section) {
            return Ok(settings);
        }
        let settings = self.inner.transport.fetch_section(section).await?;
        self.inner.cache.insert(section.clone(), settings.clone());
        Ok(settings)
    }

    /// Stage a value edit.
    ///
    /// The cache mutates immediately and synchronously; the backend write
    /// happens after the quiet window, carrying the latest staged value.
    /// Edits to a setting that is not currently cached are ignored (there
    /// is no entry to edit; fetch the section first).
    pub fn stage_update(&self, section: &SectionPath, name: &str, value: SettingValue) {
        let Some(prior) = self
            .inner
            .cache
            .apply_optimistic(section, name, value.clone())
        else {
            tracing::warn!(section = %section, name, "edit ignored; setting not cached");
            return;
        };

        let key = (section.clone(), name.to_string());
        let mut pending = self.inner.pending_slot();
        let original = match pending.remove(&key) {
            Some(previous) => {
                previous.timer.abort();
                previous.original
            }
            None => prior,
        };
        let timer = Inner::spawn_flush(&self.inner, section.clone(), name.to_string());
        pending.insert(
            key,
            PendingWrite {
                original,
                latest: value,
                timer,
            },
        );
    }
}

impl<T> Drop for SettingsService<T> {
    fn drop(&mut self) {
        for write in self.inner.pending_slot().values() {
            write.timer.abort();
        }
        self.inner.sync.shutdown();
    }
}

impl<T> Inner<T> {
    fn pending_slot(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<(SectionPath, String), PendingWrite>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T: SettingsTransport> Inner<T> {
    fn spawn_flush(inner: &Arc<Self>, section: SectionPath, name: String) -> AbortHandle {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.flush(section, name).await;
        })
        .abort_handle()
    }

    async fn flush(&self, section: SectionPath, name: String) {
        let Some(write) = self
            .pending_slot()
            .remove(&(section.clone(), name.clone()))
        else {
            return;
        };

        match self
            .transport
            .update_setting(&section, &name, &write.latest)
            .await
        {
            Ok(updated) => {
                tracing::debug!(section = %section, name, "setting write confirmed");
                self.sync.broadcast_update(SettingUpdated {
                    section_path: section,
                    setting_name: name,
                    updated_setting: updated,
                });
            }
            Err(err) => {
                tracing::warn!(
                    section = %section,
                    name,
                    error = %err,
                    "setting write failed; rolling back"
                );
                self.cache.rollback(&section, &name, write.original);
                let _ = self.events.send(SettingsEvent::WriteFailed {
                    section_path: section,
                    name,
                    reason: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SettingsTransport;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingTransport {
        fetch_result: Vec<CachedSetting>,
        writes: Mutex<Vec<(SectionPath, String, SettingValue)>>,
        fail_writes: AtomicBool,
    }

    impl RecordingTransport {
        fn new(fetch_result: Vec<CachedSetting>) -> Self {
            Self {
                fetch_result,
                writes: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
            }
        }

        fn writes(&self) -> Vec<(SectionPath, String, SettingValue)> {
            self.writes.lock().unwrap().clone()
        }
    }

    impl SettingsTransport for RecordingTransport {
        async fn fetch_section(
            &self,
            _section: &SectionPath,
        ) -> Result<Vec<CachedSetting>, Error> {
            Ok(self.fetch_result.clone())
        }

        async fn update_setting(
            &self,
            section: &SectionPath,
            name: &str,
            value: &SettingValue,
        ) -> Result<CachedSetting, Error> {
            if self.fail_writes.load(Ordering::Relaxed) {
                return Err(Error::Server {
                    operation: "update setting",
                    status: 500,
                });
            }
            self.writes
                .lock()
                .unwrap()
                .push((section.clone(), name.to_string(), value.clone()));
            Ok(CachedSetting::new(section.clone(), name, value.clone()))
        }
    }

    fn section() -> SectionPath {
        "Application.Security".parse().unwrap()
    }

    fn seeded_transport() -> RecordingTransport {
        RecordingTransport::new(vec![CachedSetting::new(
            section(),
            "session.timeout",
            SettingValue::Integer(300),
        )])
    }

    fn service(
        transport: Arc<RecordingTransport>,
        hub: &SyncHub,
    ) -> (
        SettingsService<RecordingTransport>,
        mpsc::UnboundedReceiver<SettingsEvent>,
    ) {
        let config = Config::new("https://console.example.com/api/".parse().unwrap());
        SettingsService::new(transport, hub, &config)
    }

    #[tokio::test(start_paused = true)]
    async fn get_reads_through_the_cache() {
        let transport = Arc::new(seeded_transport());
        let hub = SyncHub::new();
        let (svc, _events) = service(Arc::clone(&transport), &hub);

        let first = svc.get(&section()).await.unwrap();
        assert_eq!(first[0].value, SettingValue::Integer(300));

        let second = svc.get(&section()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_burst_coalesces_into_one_write() {
        let transport = Arc::new(seeded_transport());
        let hub = SyncHub::new();
        let (svc, _events) = service(Arc::clone(&transport), &hub);
        svc.get(&section()).await.unwrap();

        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(450));
        tokio::time::sleep(Duration::from_millis(300)).await;
        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(600));

        // Optimistic value is visible before any network traffic.
        assert_eq!(
            svc.cache().lookup(&section(), "session.timeout"),
            Some(SettingValue::Integer(600))
        );
        assert!(transport.writes().is_empty());

        tokio::time::sleep(Duration::from_millis(900)).await;
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].2, SettingValue::Integer(600));
    }

    #[tokio::test(start_paused = true)]
    async fn separate_settings_debounce_independently() {
        let transport = Arc::new(RecordingTransport::new(vec![
            CachedSetting::new(section(), "session.timeout", SettingValue::Integer(300)),
            CachedSetting::new(section(), "theme", SettingValue::Text("light".into())),
        ]));
        let hub = SyncHub::new();
        let (svc, _events) = service(Arc::clone(&transport), &hub);
        svc.get(&section()).await.unwrap();

        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(600));
        svc.stage_update(&section(), "theme", SettingValue::Text("dark".into()));

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(transport.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_rolls_back_to_preburst_value() {
        let transport = Arc::new(seeded_transport());
        transport.fail_writes.store(true, Ordering::Relaxed);
        let hub = SyncHub::new();
        let (svc, mut events) = service(Arc::clone(&transport), &hub);
        svc.get(&section()).await.unwrap();

        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(450));
        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(600));

        let event = events.recv().await.unwrap();
        let SettingsEvent::WriteFailed { name, .. } = event;
        assert_eq!(name, "session.timeout");

        // Rolled back past both staged values to the fetched one.
        assert_eq!(
            svc.cache().lookup(&section(), "session.timeout"),
            Some(SettingValue::Integer(300))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_write_reaches_sibling_instances() {
        let hub = SyncHub::new();

        let transport_a = Arc::new(seeded_transport());
        let (svc_a, _events_a) = service(Arc::clone(&transport_a), &hub);
        let transport_b = Arc::new(seeded_transport());
        let (svc_b, _events_b) = service(Arc::clone(&transport_b), &hub);

        svc_a.get(&section()).await.unwrap();
        svc_b.get(&section()).await.unwrap();
        assert!(svc_b.init_sync());

        svc_a.stage_update(&section(), "session.timeout", SettingValue::Integer(900));
        tokio::time::sleep(Duration::from_millis(900)).await;

        assert_eq!(
            svc_b.cache().lookup(&section(), "session.timeout"),
            Some(SettingValue::Integer(900))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn edit_to_uncached_setting_is_ignored() {
        let transport = Arc::new(seeded_transport());
        let hub = SyncHub::new();
        let (svc, _events) = service(Arc::clone(&transport), &hub);

        svc.stage_update(&section(), "session.timeout", SettingValue::Integer(600));
        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(transport.writes().is_empty());
    }
}
