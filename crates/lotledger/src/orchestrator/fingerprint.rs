use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use sha2::{Digest, Sha256};

use crate::sync;

/// SHA-256 over the document bytes, a zero byte and the declared invoice id,
/// hex encoded.
pub fn fingerprint(bytes: &[u8], invoice_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.update([0u8]);
    hasher.update(invoice_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// One mutex per fingerprint, created on first use and dropped from the
/// registry when its last [`FingerprintLock`] goes away.
#[derive(Default)]
pub struct FingerprintLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FingerprintLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> FingerprintLock<'_> {
        let mut locks = sync::lock(&self.locks, "fingerprint registry");
        let lock = Arc::clone(locks.entry(fingerprint.to_string()).or_default());
        FingerprintLock {
            registry: self,
            fingerprint: fingerprint.to_string(),
            lock,
        }
    }

    pub fn len(&self) -> usize {
        sync::lock(&self.locks, "fingerprint registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle on one fingerprint's mutex.
pub struct FingerprintLock<'a> {
    registry: &'a FingerprintLocks,
    fingerprint: String,
    lock: Arc<Mutex<()>>,
}

impl FingerprintLock<'_> {
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        sync::lock(&self.lock, "fingerprint")
    }
}

impl Drop for FingerprintLock<'_> {
    fn drop(&mut self) {
        let mut locks = sync::lock(&self.registry.locks, "fingerprint registry");
        // The registry's reference plus this handle
        let last = Arc::strong_count(&self.lock) == 2;
        let ours = locks
            .get(&self.fingerprint)
            .is_some_and(|registered| Arc::ptr_eq(registered, &self.lock));
        if last && ours {
            locks.remove(&self.fingerprint);
        }
    }
}
