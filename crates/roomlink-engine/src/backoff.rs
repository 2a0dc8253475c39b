//! Reconnect delay policy.

use std::time::Duration;

use rand::Rng;

const BASE_MS: u64 = 100;
const JITTER_MS: u64 = 1_000;
const CAP_MS: u64 = 7_000;

/// Delay before reconnect attempt `attempt` (1-based).
///
/// `100ms * 2^(attempt-1)` plus up to one second of jitter, capped at seven
/// seconds. Attempt 0 means "no wait".
pub fn backoff<R: Rng + ?Sized>(attempt: u16, rng: &mut R) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    // Past 2^16 the cap has long taken over.
    let exponent = u32::from(attempt - 1).min(16);
    let base = BASE_MS << exponent;
    let jitter = rng.random_range(0..=JITTER_MS);
    Duration::from_millis(base.saturating_add(jitter).min(CAP_MS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn attempt_zero_is_immediate() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(backoff(0, &mut rng), Duration::ZERO);
    }

    #[test]
    fn stays_within_bounds() {
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            for attempt in 1..=12u16 {
                let base = 100u64 << u32::from(attempt - 1).min(16);
                let delay = backoff(attempt, &mut rng).as_millis() as u64;
                assert!(delay >= base.min(7_000), "attempt {attempt}: {delay} < {base}");
                assert!(delay <= (base + 1_000).min(7_000), "attempt {attempt}: {delay}");
            }
        }
    }

    #[test]
    fn late_attempts_hit_the_cap() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(backoff(8, &mut rng), Duration::from_millis(7_000));
        assert_eq!(backoff(u16::MAX, &mut rng), Duration::from_millis(7_000));
    }

    #[test]
    fn same_seed_same_delays() {
        let mut a = StdRng::seed_from_u64(42);
        let mut b = StdRng::seed_from_u64(42);
        let first: Vec<_> = (1..=6).map(|n| backoff(n, &mut a)).collect();
        let second: Vec<_> = (1..=6).map(|n| backoff(n, &mut b)).collect();
        assert_eq!(first, second);
    }
}
