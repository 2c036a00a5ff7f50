//! Best-effort propagation of setting updates between instances.
//!
//! Mirrors browser origin messaging: one named channel per process group; a
//! confirmed write is announced to every other attached cache, which applies
//! it locally and never re-announces. Delivery is at-most-once, unordered
//! with respect to other instances' local writes, and concurrent writers to
//! the same setting resolve as last-message-applied. That gap is deliberate;
//! do not build conflict detection on top of this channel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use super::cache::SettingsCache;
use super::types::CachedSetting;
use crate::types::SectionPath;

/// Buffered messages per subscriber before the oldest are dropped.
const CHANNEL_CAPACITY: usize = 64;

/// A confirmed setting write, announced to sibling instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingUpdated {
    pub section_path: SectionPath,
    pub setting_name: String,
    pub updated_setting: CachedSetting,
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: usize,
    update: SettingUpdated,
}

/// Shared hub connecting the settings caches of one origin.
///
/// Clones refer to the same underlying channel; create one hub per process
/// group and hand it to every [`SettingsService`](super::SettingsService).
#[derive(Clone)]
pub struct SyncHub {
    tx: broadcast::Sender<Envelope>,
    next_origin: Arc<AtomicUsize>,
}

impl SyncHub {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            next_origin: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Live subscriptions on this hub (diagnostics).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn register(&self) -> SyncHandle {
        SyncHandle {
            origin: self.next_origin.fetch_add(1, Ordering::Relaxed),
            tx: self.tx.clone(),
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
        }
    }
}

impl Default for SyncHub {
    fn default() -> Self {
        Self::new()
    }
}

/// One instance's attachment to a [`SyncHub`].
pub(crate) struct SyncHandle {
    origin: usize,
    tx: broadcast::Sender<Envelope>,
    started: AtomicBool,
    listener: Mutex<Option<AbortHandle>>,
}

impl SyncHandle {
    /// Start applying inbound updates to `cache`. Idempotent: the first call
    /// subscribes, later calls are no-ops, so double-starting never yields
    /// duplicate deliveries.
    pub(crate) fn init_sync(&self, cache: Arc<SettingsCache>) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            return false;
        }

        let mut rx = self.tx.subscribe();
        let origin = self.origin;
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) => {
                        if envelope.origin == origin {
                            continue;
                        }
                        // Applied locally only; re-announcing here would
                        // ping-pong updates between instances forever.
                        cache.apply_remote(
                            &envelope.update.section_path,
                            envelope.update.updated_setting,
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "settings sync lagged; updates dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        if let Ok(mut listener) = self.listener.lock() {
            *listener = Some(handle.abort_handle());
        }
        true
    }

    /// Announce a confirmed write. Best-effort: a closed channel is
    /// swallowed, never an error for the write path that got here.
    pub(crate) fn broadcast_update(&self, update: SettingUpdated) {
        let envelope = Envelope {
            origin: self.origin,
            update,
        };
        if self.tx.send(envelope).is_err() {
            tracing::debug!("settings sync channel has no listeners; update not announced");
        }
    }

    pub(crate) fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::types::SettingValue;
    use std::time::Duration;

    fn section() -> SectionPath {
        "Application.Security".parse().unwrap()
    }

    fn update(value: i64) -> SettingUpdated {
        SettingUpdated {
            section_path: section(),
            setting_name: "session.timeout".into(),
            updated_setting: CachedSetting::new(
                section(),
                "session.timeout",
                SettingValue::Integer(value),
            ),
        }
    }

    async fn settle() {
        // Let the listener task drain its channel.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn broadcast_reaches_sibling_cache() {
        let hub = SyncHub::new();
        let sender = hub.register();
        let receiver = hub.register();

        let cache = Arc::new(SettingsCache::new());
        cache.insert(
            section(),
            vec![CachedSetting::new(
                section(),
                "session.timeout",
                SettingValue::Integer(300),
            )],
        );
        assert!(receiver.init_sync(Arc::clone(&cache)));

        sender.broadcast_update(update(900));
        settle().await;

        assert_eq!(
            cache.lookup(&section(), "session.timeout"),
            Some(SettingValue::Integer(900))
        );
    }

    #[tokio::test]
    async fn receiver_applies_without_reannouncing() {
        let hub = SyncHub::new();
        let sender = hub.register();
        let receiver = hub.register();

        let cache = Arc::new(SettingsCache::new());
        cache.insert(
            section(),
            vec![CachedSetting::new(
                section(),
                "session.timeout",
                SettingValue::Integer(300),
            )],
        );
        receiver.init_sync(Arc::clone(&cache));

        // Independent tap on the channel: exactly one message must cross it.
        let mut tap = hub.tx.subscribe();

        sender.broadcast_update(update(900));
        settle().await;

        assert!(tap.try_recv().is_ok());
        assert!(tap.try_recv().is_err());
    }

    #[tokio::test]
    async fn own_updates_are_not_applied_back() {
        let hub = SyncHub::new();
        let handle = hub.register();

        let cache = Arc::new(SettingsCache::new());
        cache.insert(
            section(),
            vec![CachedSetting::new(
                section(),
                "session.timeout",
                SettingValue::Integer(300),
            )],
        );
        handle.init_sync(Arc::clone(&cache));

        handle.broadcast_update(update(900));
        settle().await;

        // The announcing instance already holds its optimistic value; its
        // own message must not restamp or rewrite the entry.
        assert_eq!(
            cache.lookup(&section(), "session.timeout"),
            Some(SettingValue::Integer(300))
        );
    }

    #[tokio::test]
    async fn init_sync_is_idempotent() {
        let hub = SyncHub::new();
        let handle = hub.register();
        let cache = Arc::new(SettingsCache::new());

        assert!(handle.init_sync(Arc::clone(&cache)));
        settle().await;
        let subscribed = hub.subscriber_count();

        assert!(!handle.init_sync(Arc::clone(&cache)));
        settle().await;
        assert_eq!(hub.subscriber_count(), subscribed);
    }

    #[tokio::test]
    async fn broadcast_without_listeners_is_swallowed() {
        let hub = SyncHub::new();
        let handle = hub.register();
        // No subscriber anywhere: must not panic or error.
        handle.broadcast_update(update(900));
    }
}
