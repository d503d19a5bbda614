use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use meridian_common::ErrorKind;
use rand::Rng;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;

use crate::events::{Event, ModelUnavailableStartEvent, OperationalEvent, UnavailableStartEvent};
use crate::{CredentialId, CredentialState, EventHub, KeyEntry, UnavailableReason};

use super::model_unavailable_queue::ModelUnavailableQueue;
use super::unavailable_queue::UnavailableQueue;

type ModelStateKey = (CredentialId, String);
type ModelStateValue = (Instant, UnavailableReason);

#[derive(Debug, Clone)]
pub enum AcquireError {
    ProviderUnknown,
}

/// A scoped key acquisition (§3 `PooledClient`/`KeyEntry` usage contract).
/// Dropping it releases the key's in-flight slot exactly once, including on
/// cancellation or panic-unwind — callers never need to remember to call a
/// release method themselves.
pub struct Acquisition {
    entry: Arc<KeyEntry>,
    release_notify: Arc<Notify>,
    released: bool,
}

impl Acquisition {
    pub fn key(&self) -> &KeyEntry {
        &self.entry
    }

    pub fn credential_id(&self) -> CredentialId {
        self.entry.id
    }

    pub fn secret(&self) -> &str {
        &self.entry.secret
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        if !self.released {
            self.entry.release();
            self.release_notify.notify_waiters();
        }
    }
}

pub struct CredentialPool {
    entries: RwLock<HashMap<String, Vec<Arc<KeyEntry>>>>,
    states: Arc<RwLock<HashMap<CredentialId, CredentialState>>>,
    model_states: Arc<RwLock<HashMap<ModelStateKey, ModelStateValue>>>,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
    model_queue: Arc<ModelUnavailableQueue>,
    release_notify: Arc<Notify>,
}

impl CredentialPool {
    pub fn new(events: EventHub) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let model_states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        let model_queue = Arc::new(ModelUnavailableQueue::new());
        queue
            .clone()
            .spawn_recover_task(states.clone(), events.clone());
        model_queue
            .clone()
            .spawn_recover_task(model_states.clone(), events.clone());
        Self {
            entries: RwLock::new(HashMap::new()),
            states,
            model_states,
            events,
            queue,
            model_queue,
            release_notify: Arc::new(Notify::new()),
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn reconfigure(&self, provider: impl Into<String>, keys: Vec<KeyEntry>) {
        let provider = provider.into();
        let mut states = self.states.write().await;
        let wrapped: Vec<Arc<KeyEntry>> = keys.into_iter().map(Arc::new).collect();
        for entry in &wrapped {
            states.entry(entry.id).or_insert(CredentialState::Active);
        }
        drop(states);
        self.entries.write().await.insert(provider, wrapped);
    }

    /// Selects a key per §4.2: allowlist filter, capacity filter, weighted
    /// random among survivors with least-in-flight tiebreak, blocking on a
    /// release notification until `deadline`.
    pub async fn acquire(
        &self,
        provider: &str,
        model: &str,
        deadline: Instant,
    ) -> Result<Acquisition, ErrorKind> {
        loop {
            match self.try_select(provider, model).await {
                Ok(Some(entry)) => {
                    return Ok(Acquisition {
                        entry,
                        release_notify: self.release_notify.clone(),
                        released: false,
                    });
                }
                Ok(None) => {}
                Err(AcquireError::ProviderUnknown) => {
                    return Err(ErrorKind::NoKeyAvailable(format!(
                        "provider {provider} has no configured keys"
                    )));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ErrorKind::NoKeyAvailable(format!(
                    "no active key available for provider {provider} model {model}"
                )));
            }
            let _ = tokio::time::timeout(deadline - now, self.release_notify.notified()).await;
        }
    }

    async fn try_select(
        &self,
        provider: &str,
        model: &str,
    ) -> Result<Option<Arc<KeyEntry>>, AcquireError> {
        let entries = {
            let guard = self.entries.read().await;
            guard.get(provider).cloned()
        };
        let Some(entries) = entries else {
            return Err(AcquireError::ProviderUnknown);
        };

        let states = self.states.read().await;
        let model_states = self.model_states.read().await;
        let now = Instant::now();
        let candidates: Vec<Arc<KeyEntry>> = entries
            .into_iter()
            .filter(|e| e.allows_model(model))
            .filter(|e| matches!(states.get(&e.id), Some(CredentialState::Active)))
            .filter(|e| {
                let key = (e.id, model.to_string());
                match model_states.get(&key) {
                    Some((until, _)) => *until <= now,
                    None => true,
                }
            })
            .filter(|e| e.has_capacity())
            .collect();
        drop(model_states);
        drop(states);

        let Some(chosen) = weighted_pick(&candidates) else {
            return Ok(None);
        };
        if chosen.try_acquire() {
            Ok(Some(chosen))
        } else {
            // Lost a race against another acquirer; caller retries the wait loop.
            Ok(None)
        }
    }

    pub async fn mark_unavailable(
        &self,
        credential_id: CredentialId,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let until_instant = Instant::now() + duration;
        {
            let mut guard = self.states.write().await;
            guard.insert(
                credential_id,
                CredentialState::Unavailable {
                    until: until_instant,
                    reason,
                },
            );
        }
        self.queue.push(until_instant, credential_id).await;
        self.release_notify.notify_waiters();

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    pub async fn mark_model_unavailable(
        &self,
        credential_id: CredentialId,
        model: impl Into<String>,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let model = model.into();
        let until_instant = Instant::now() + duration;
        {
            let mut guard = self.model_states.write().await;
            guard.insert((credential_id, model.clone()), (until_instant, reason));
        }
        self.model_queue
            .push(until_instant, credential_id, model.clone())
            .await;
        self.release_notify.notify_waiters();

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::ModelUnavailableStart(
                ModelUnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id,
                    model,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    pub async fn state(&self, credential_id: CredentialId) -> Option<CredentialState> {
        self.states.read().await.get(&credential_id).cloned()
    }
}

/// Weighted-random selection with a least-in-flight tiebreak among entries
/// sharing the winning weight — the common case of uniformly weighted keys
/// reduces to pure load balancing.
fn weighted_pick(candidates: &[Arc<KeyEntry>]) -> Option<Arc<KeyEntry>> {
    if candidates.is_empty() {
        return None;
    }
    let total: u32 = candidates.iter().map(|c| c.weight).sum();
    let mut roll = rand::rng().random_range(0..total.max(1));
    for candidate in candidates {
        if roll < candidate.weight {
            return candidates
                .iter()
                .filter(|c| c.weight == candidate.weight)
                .min_by_key(|c| c.in_flight())
                .cloned();
        }
        roll -= candidate.weight;
    }
    candidates.last().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: CredentialId, weight: u32, max_concurrent: u32) -> KeyEntry {
        KeyEntry::new(id, format!("secret-{id}"), weight, max_concurrent, vec![])
    }

    #[tokio::test]
    async fn acquire_picks_an_active_key_with_capacity() {
        let pool = CredentialPool::new(EventHub::new(16));
        pool.reconfigure("openai", vec![key(1, 1, 1)]).await;
        let acquisition = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(50))
            .await
            .expect("should acquire");
        assert_eq!(acquisition.credential_id(), 1);
    }

    #[tokio::test]
    async fn acquire_respects_max_concurrency() {
        let pool = CredentialPool::new(EventHub::new(16));
        pool.reconfigure("openai", vec![key(1, 1, 1)]).await;
        let _first = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(10))
            .await
            .unwrap();
        let second = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(30))
            .await;
        assert!(matches!(second, Err(ErrorKind::NoKeyAvailable(_))));
    }

    #[tokio::test]
    async fn release_wakes_a_blocked_waiter() {
        let pool = Arc::new(CredentialPool::new(EventHub::new(16)));
        pool.reconfigure("openai", vec![key(1, 1, 1)]).await;
        let first = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(10))
            .await
            .unwrap();

        let waiter_pool = pool.clone();
        let waiter = tokio::spawn(async move {
            waiter_pool
                .acquire("openai", "gpt-4o", Instant::now() + Duration::from_secs(2))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_provider_fails_fast() {
        let pool = CredentialPool::new(EventHub::new(16));
        let result = pool
            .acquire("nobody", "m", Instant::now() + Duration::from_millis(5))
            .await;
        assert!(matches!(result, Err(ErrorKind::NoKeyAvailable(_))));
    }

    #[tokio::test]
    async fn mark_unavailable_excludes_key_then_recovers() {
        let pool = CredentialPool::new(EventHub::new(16));
        pool.reconfigure("openai", vec![key(1, 1, 4)]).await;
        pool.mark_unavailable(1, Duration::from_millis(30), UnavailableReason::RateLimit)
            .await;
        let immediate = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(5))
            .await;
        assert!(matches!(immediate, Err(ErrorKind::NoKeyAvailable(_))));

        let recovered = pool
            .acquire("openai", "gpt-4o", Instant::now() + Duration::from_millis(200))
            .await;
        assert!(recovered.is_ok());
    }
}
