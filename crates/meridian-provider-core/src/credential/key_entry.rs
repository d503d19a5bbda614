use std::sync::atomic::{AtomicU32, Ordering};

use super::state::CredentialId;

/// One credential in a provider's key pool: an opaque secret plus the
/// selection/accounting fields the pool needs. Invariant: `in_flight <=
/// max_concurrent` at every observation point (§5).
pub struct KeyEntry {
    pub id: CredentialId,
    pub secret: String,
    pub weight: u32,
    pub max_concurrent: u32,
    /// Empty allowlist means "allow all models".
    pub model_allowlist: Vec<String>,
    in_flight: AtomicU32,
}

impl KeyEntry {
    pub fn new(
        id: CredentialId,
        secret: impl Into<String>,
        weight: u32,
        max_concurrent: u32,
        model_allowlist: Vec<String>,
    ) -> Self {
        Self {
            id,
            secret: secret.into(),
            weight: weight.max(1),
            max_concurrent: max_concurrent.max(1),
            model_allowlist,
            in_flight: AtomicU32::new(0),
        }
    }

    pub fn allows_model(&self, model: &str) -> bool {
        self.model_allowlist.is_empty() || self.model_allowlist.iter().any(|m| m == model)
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight() < self.max_concurrent
    }

    /// Returns `false` (and does not increment) if the entry is already at
    /// capacity; the caller must treat that as a failed acquisition.
    pub(crate) fn try_acquire(&self) -> bool {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            if current >= self.max_concurrent {
                return false;
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub(crate) fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}
