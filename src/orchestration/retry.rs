use crate::workflow::{BackoffStrategy, RetrySpec};
use std::time::Duration;

/// Delay slept after failed attempt `attempt` (1-based) before the next one:
/// `none` is the fixed delay, `linear` is `delay * attempt`, `exponential` is
/// `delay * 2^(attempt - 1)`.
pub fn retry_delay(spec: &RetrySpec, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    match spec.backoff {
        BackoffStrategy::None => spec.delay,
        BackoffStrategy::Linear => spec.delay.saturating_mul(attempt),
        BackoffStrategy::Exponential => {
            let factor = 2_u32.saturating_pow(attempt - 1);
            spec.delay.saturating_mul(factor)
        }
    }
}
