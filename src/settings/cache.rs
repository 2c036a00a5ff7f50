use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::types::{CachedSetting, SettingValue};
use crate::config::DEFAULT_SETTINGS_TTL;
use crate::types::SectionPath;

struct Entry {
    fetched_at: Instant,
    settings: Vec<CachedSetting>,
}

impl Entry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Time-boxed in-memory cache of server configuration, one per instance.
///
/// Not a source of truth: entries older than the TTL are treated as absent
/// and the backend is consulted again. An entry's timestamp resets when a
/// fetch replaces it or a sibling instance announces an update; optimistic
/// local edits keep the existing expiry horizon.
pub struct SettingsCache {
    ttl: Duration,
    entries: Mutex<HashMap<SectionPath, Entry>>,
}

impl SettingsCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SETTINGS_TTL)
    }

    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<SectionPath, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Fresh settings for a section, or `None` when missing or expired.
    /// Expired entries are evicted on the way out.
    #[must_use]
    pub fn get(&self, section: &SectionPath) -> Option<Vec<CachedSetting>> {
        let mut entries = self.entries();
        match entries.get(section) {
            Some(entry) if entry.is_fresh(self.ttl) => Some(entry.settings.clone()),
            Some(_) => {
                entries.remove(section);
                None
            }
            None => None,
        }
    }

    /// Single value from a fresh section.
    #[must_use]
    pub fn lookup(&self, section: &SectionPath, name: &str) -> Option<SettingValue> {
        let entries = self.entries();
        let entry = entries.get(section).filter(|e| e.is_fresh(self.ttl))?;
        entry
            .settings
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.value.clone())
    }

    /// Replace a section after a successful fetch, restamping its TTL.
    pub fn insert(&self, section: SectionPath, settings: Vec<CachedSetting>) {
        self.entries().insert(
            section,
            Entry {
                fetched_at: Instant::now(),
                settings,
            },
        );
    }

    /// Mutate one value in place without restamping (optimistic local edit).
    ///
    /// Returns the prior value so the caller can roll a failed write back,
    /// or `None` when the section or setting is not cached.
    pub fn apply_optimistic(
        &self,
        section: &SectionPath,
        name: &str,
        value: SettingValue,
    ) -> Option<SettingValue> {
        let mut entries = self.entries();
        let entry = entries.get_mut(section)?;
        let setting = entry.settings.iter_mut().find(|s| s.name == name)?;
        Some(std::mem::replace(&mut setting.value, value))
    }

    /// Restore a previously captured value after a failed write. The entry's
    /// timestamp is left untouched; a missing entry is a no-op.
    pub fn rollback(&self, section: &SectionPath, name: &str, original: SettingValue) {
        let mut entries = self.entries();
        if let Some(setting) = entries
            .get_mut(section)
            .and_then(|entry| entry.settings.iter_mut().find(|s| s.name == name))
        {
            setting.value = original;
        }
    }

    /// Apply an update announced by a sibling instance: replace the matching
    /// setting by name (or add it) and restamp the entry. Sections we never
    /// cached are ignored; there is nothing local to bring up to date.
    pub fn apply_remote(&self, section: &SectionPath, setting: CachedSetting) {
        let mut entries = self.entries();
        if let Some(entry) = entries.get_mut(section) {
            match entry.settings.iter_mut().find(|s| s.name == setting.name) {
                Some(slot) => *slot = setting,
                None => entry.settings.push(setting),
            }
            entry.fetched_at = Instant::now();
        }
    }
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}
