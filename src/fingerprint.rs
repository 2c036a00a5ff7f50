//! Best-effort device fingerprinting for refresh requests.
//!
//! A fingerprint is a soft anti-replay signal sent alongside every token
//! refresh so the backend can notice a token replayed from a very different
//! machine. It is **not** an authentication factor: the signals are
//! self-reported, the digest is a rolling multiply-and-add with a small
//! state space, and collisions are possible. Backends must treat a mismatch
//! as advisory, never as an access-control decision.

use serde::Serialize;

/// Snapshot of host characteristics.
///
/// Recomputed fresh for every refresh attempt and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct DeviceFingerprint {
    pub hostname: String,
    pub platform: String,
    pub arch: String,
    pub os_version: String,
    pub timezone: String,
    pub locale: String,
    /// Client identifier, `<crate>/<version>`.
    pub client: String,
    pub hardware_concurrency: u32,
    pub memory_gib: u64,
}

/// Deterministic digest of a [`DeviceFingerprint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintHash {
    pub hash: String,
    /// Fixed-length prefix of `hash` for fast comparison.
    pub short_hash: String,
}

/// Length of [`FingerprintHash::short_hash`].
pub const SHORT_HASH_LEN: usize = 8;

/// Times the 16-hex-digit accumulator is repeated to form the full hash.
const HASH_FOLDS: usize = 4;

/// Collects a fingerprint from the current host.
///
/// Every signal is best-effort: anything unavailable degrades to an empty
/// string or zero rather than failing the refresh that asked for it.
#[must_use]
pub fn generate() -> DeviceFingerprint {
    let mut system = sysinfo::System::new();
    system.refresh_memory();

    DeviceFingerprint {
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_default(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        os_version: sysinfo::System::os_version().unwrap_or_default(),
        timezone: timezone(),
        locale: std::env::var("LANG").unwrap_or_default(),
        client: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        hardware_concurrency: std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(0),
        memory_gib: system.total_memory() / (1024 * 1024 * 1024),
    }
}

fn timezone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        return tz;
    }
    std::fs::read_to_string("/etc/timezone")
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

/// Hashes a fingerprint into a stable digest.
///
/// The digest is a rolling multiply-and-add over the key-sorted JSON form
/// of the fingerprint, folded out to a fixed-width hex string. Calling it
/// twice on an unchanged fingerprint yields identical output.
#[must_use]
pub fn hash(fingerprint: &DeviceFingerprint) -> FingerprintHash {
    // serde_json object keys are ordered, so this form is stable across runs.
    let canonical = serde_json::to_value(fingerprint)
        .map(|value| value.to_string())
        .unwrap_or_default();

    let mut acc: u64 = 0;
    for byte in canonical.bytes() {
        acc = acc.wrapping_mul(31).wrapping_add(u64::from(byte));
    }

    let hash = hex::encode(acc.to_be_bytes()).repeat(HASH_FOLDS);
    let short_hash = hash[..SHORT_HASH_LEN].to_string();
    FingerprintHash { hash, short_hash }
}
