//! Single-flight build-lease registry (§4.7, §8 property 4): the first
//! caller to miss for a given fingerprint becomes the builder; every other
//! concurrent caller for the same fingerprint waits on it instead of
//! dispatching its own upstream call. Grounded on the `Notify`-based
//! acquire/release pattern in `meridian-provider-core`'s `CredentialPool`,
//! generalized from "release a key slot" to "release a build slot, with an
//! expiry that frees waiters to build independently if the builder never
//! reports back."

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_fingerprint::Fingerprint;
use tokio::sync::Notify;
use tokio::time::{timeout, Instant};

struct Lease {
    notify: Arc<Notify>,
    expires_at: Instant,
}

/// Tracks in-flight build leases, one per fingerprint.
#[derive(Default)]
pub struct LeaseRegistry {
    inflight: Mutex<HashMap<[u8; 32], Lease>>,
}

/// What the caller should do after calling [`LeaseRegistry::acquire`].
pub enum LeaseOutcome {
    /// No other builder is in flight; the caller owns the lease and must
    /// call [`LeaseRegistry::release`] exactly once, success or failure.
    Build,
    /// Another caller is already building; this caller waited for it (either
    /// to completion, or until the lease expired) and should re-check the
    /// direct tier rather than building itself.
    Waited,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to become the builder for `fingerprint`. If another build is
    /// already in flight, waits up to `deadline` for it to finish (i.e. for
    /// [`release`](Self::release) to be called) before returning control to
    /// the caller regardless of outcome.
    pub async fn acquire(&self, fingerprint: &Fingerprint, deadline: Duration) -> LeaseOutcome {
        let key = *fingerprint.as_bytes();
        let existing = {
            let mut guard = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match guard.get(&key) {
                Some(lease) if lease.expires_at > Instant::now() => Some(lease.notify.clone()),
                _ => {
                    guard.insert(
                        key,
                        Lease { notify: Arc::new(Notify::new()), expires_at: Instant::now() + deadline },
                    );
                    None
                }
            }
        };
        match existing {
            None => LeaseOutcome::Build,
            Some(notify) => {
                let _ = timeout(deadline, notify.notified()).await;
                LeaseOutcome::Waited
            }
        }
    }

    /// Releases the lease for `fingerprint`, waking every waiter immediately
    /// instead of making them sit out the full deadline.
    pub fn release(&self, fingerprint: &Fingerprint) {
        let mut guard = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lease) = guard.remove(fingerprint.as_bytes()) {
            lease.notify.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; 32])
    }

    #[tokio::test]
    async fn first_caller_builds_second_waits() {
        let registry = Arc::new(LeaseRegistry::new());
        let key = fp(1);

        let first = registry.acquire(&key, Duration::from_secs(5)).await;
        assert!(matches!(first, LeaseOutcome::Build));

        let registry2 = registry.clone();
        let waiter = tokio::spawn(async move { registry2.acquire(&fp(1), Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.release(&key);

        let second = waiter.await.unwrap();
        assert!(matches!(second, LeaseOutcome::Waited));
    }

    #[tokio::test]
    async fn concurrent_builders_for_distinct_fingerprints_do_not_block_each_other() {
        let registry = LeaseRegistry::new();
        let counter = AtomicUsize::new(0);
        for byte in 0..4u8 {
            if matches!(registry.acquire(&fp(byte), Duration::from_secs(5)).await, LeaseOutcome::Build) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
