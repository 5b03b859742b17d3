use std::time::Duration;

/// Pacing for self-heal restarts after a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// No waiting at all. Failures restart the loop on the next scheduler turn.
    pub fn immediate() -> Self {
        Self {
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

/// Exponential backoff for the `consecutive_errors`-th failure in a row.
///
/// Jitter is derived from `seed` so independent pollers don't retry in lockstep.
pub fn compute_backoff_delay(policy: &RetryPolicy, consecutive_errors: u32, seed: u64) -> Duration {
    if policy.initial_backoff.is_zero() && policy.jitter.is_zero() {
        return Duration::ZERO;
    }

    let shift = u32::min(consecutive_errors.saturating_sub(1), 20);
    let exponential_ms = policy
        .initial_backoff
        .as_millis()
        .saturating_mul(1u128 << shift);
    let capped_ms = exponential_ms.min(policy.max_backoff.as_millis());

    let jitter_ms = if policy.jitter.is_zero() {
        0
    } else {
        deterministic_jitter(seed, consecutive_errors, policy.jitter.as_millis())
    };

    let total_ms = capped_ms.saturating_add(jitter_ms);
    Duration::from_millis(total_ms.min(u64::MAX as u128) as u64)
}

fn deterministic_jitter(seed: u64, attempt: u32, jitter_cap: u128) -> u128 {
    if jitter_cap == 0 {
        return 0;
    }

    let mut x = seed ^ (attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51_afd7_ed55_8ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    x ^= x >> 33;

    (x as u128) % (jitter_cap + 1)
}

#[cfg(test)]
mod tests {
    use super::{compute_backoff_delay, RetryPolicy};
    use std::time::Duration;

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(5),
            jitter: Duration::ZERO,
        };
        assert_eq!(compute_backoff_delay(&policy, 1, 7), Duration::from_secs(1));
        assert_eq!(compute_backoff_delay(&policy, 2, 7), Duration::from_secs(2));
        assert_eq!(compute_backoff_delay(&policy, 3, 7), Duration::from_secs(4));
        assert_eq!(compute_backoff_delay(&policy, 4, 7), Duration::from_secs(5));
        assert_eq!(compute_backoff_delay(&policy, 400, 7), Duration::from_secs(5));
    }

    #[test]
    fn jitter_is_bounded_and_deterministic() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };
        let first = compute_backoff_delay(&policy, 1, 42);
        assert_eq!(first, compute_backoff_delay(&policy, 1, 42));
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(150));
    }

    #[test]
    fn immediate_policy_never_waits() {
        assert_eq!(
            compute_backoff_delay(&RetryPolicy::immediate(), 9, 1),
            Duration::ZERO
        );
    }
}
