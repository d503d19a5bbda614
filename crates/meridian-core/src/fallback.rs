//! Fallback State Machine (C5, §4.5): `Primary -> Retrying -> NextFallback ->
//! Exhausted -> Done`. Targets are tried strictly in declared order; within a
//! target, retries are sequential. Grounded on [`meridian_common::ErrorKind`]'s
//! `is_retryable`/`allows_fallback` classification (already the shared
//! taxonomy every adapter maps onto) and on `CredentialPool`'s per-key
//! cooldown bookkeeping for the `NoKeyAvailable` transition.

use std::time::Duration;

use meridian_common::{AttemptOutcome, ErrorKind, ErrorKindTag};
use meridian_protocol::FallbackTarget;
use rand::Rng;

use crate::config::PipelineConfig;

/// One attempt's terminal signal back to the state machine.
pub enum AttemptResult<T> {
    Success(T),
    Failure(ErrorKind),
}

/// Drives the fallback loop over `targets` (primary first, then `fallbacks`
/// in order), invoking `attempt` once per try. `attempt` receives the target
/// and the 0-based attempt number against that target.
///
/// Returns `Ok(value)` on the first success, or `Err` carrying the full
/// attempt log once every target's retry budget is exhausted (§4.5
/// `NextFallback -> Exhausted`).
pub async fn run<T, F, Fut>(
    targets: &[FallbackTarget],
    pipeline: &PipelineConfig,
    mut attempt: F,
) -> Result<T, Vec<AttemptOutcome>>
where
    F: FnMut(FallbackTarget, u32) -> Fut,
    Fut: std::future::Future<Output = AttemptResult<T>>,
{
    let mut log = Vec::new();

    for target in targets {
        for attempt_no in 0..=pipeline.retry_budget {
            let start = std::time::Instant::now();
            match attempt(target.clone(), attempt_no).await {
                AttemptResult::Success(value) => return Ok(value),
                AttemptResult::Failure(kind) => {
                    let latency = start.elapsed();
                    log.push(AttemptOutcome {
                        provider: target.provider.clone(),
                        model: target.model.clone(),
                        attempt: attempt_no,
                        kind: ErrorKindTag::from(&kind),
                        message: kind.to_string(),
                        latency,
                    });

                    if !kind.allows_fallback() {
                        return Err(log);
                    }
                    let retryable = kind.is_retryable() || matches!(kind, ErrorKind::NoKeyAvailable(_));
                    let retries_left = attempt_no < pipeline.retry_budget;
                    if retryable && retries_left {
                        let delay = backoff_delay(attempt_no, pipeline);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    // Non-retryable, or retry budget exhausted for this
                    // target: move on to the next declared fallback.
                    break;
                }
            }
        }
    }

    Err(log)
}

/// Exponential backoff with full jitter (base 200ms, cap 5s by default,
/// configurable): `delay = random(0, min(cap, base * 2^attempt))`.
fn backoff_delay(attempt_no: u32, pipeline: &PipelineConfig) -> Duration {
    let exp = pipeline.retry_base_ms.saturating_mul(1u64 << attempt_no.min(16));
    let capped = exp.min(pipeline.retry_cap_ms);
    let jittered = rand::rng().random_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn pipeline(retry_budget: u32) -> PipelineConfig {
        PipelineConfig {
            attempt_timeout_secs: 1,
            request_timeout_secs: 1,
            retry_base_ms: 1,
            retry_cap_ms: 2,
            retry_budget,
        }
    }

    #[tokio::test]
    async fn retryable_failures_exhaust_budget_before_moving_to_the_next_target() {
        let targets = vec![FallbackTarget::new("a", "m1"), FallbackTarget::new("b", "m2")];
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run(&targets, &pipeline(2), |target, attempt_no| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if target.provider == "b" {
                    AttemptResult::Success(())
                } else {
                    let _ = attempt_no;
                    AttemptResult::Failure(ErrorKind::RateLimited("slow down".into()))
                }
            }
        })
        .await;
        assert!(result.is_ok());
        // 3 attempts against A (budget 2 -> 3 tries), then 1 against B.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_failure_skips_straight_to_the_next_target() {
        let targets = vec![FallbackTarget::new("a", "m1"), FallbackTarget::new("b", "m2")];
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run(&targets, &pipeline(2), |target, _attempt_no| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if target.provider == "b" {
                    AttemptResult::Success(())
                } else {
                    AttemptResult::Failure(ErrorKind::BadRequest("nope".into()))
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn canceled_aborts_without_trying_further_targets() {
        let targets = vec![FallbackTarget::new("a", "m1"), FallbackTarget::new("b", "m2")];
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = run(&targets, &pipeline(2), |_target, _attempt_no| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { AttemptResult::Failure(ErrorKind::Canceled) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausting_every_target_returns_the_full_attempt_log() {
        let targets = vec![FallbackTarget::new("a", "m1")];
        let result: Result<(), _> = run(&targets, &pipeline(1), |_target, _attempt_no| async move {
            AttemptResult::Failure(ErrorKind::ProviderInternal("down".into()))
        })
        .await;
        let log = result.unwrap_err();
        assert_eq!(log.len(), 2);
    }
}
