//! Exponential backoff with jitter for operation retries.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryPolicy;

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay`, plus up to
    /// `jitter_ratio` of that in jitter scaled by `jitter_unit` in `[0, 1]`.
    pub fn delay(&self, attempt: u32, jitter_unit: f64) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let exponent = (attempt - 1).min(16);
        let scaled = base_ms.saturating_mul(1_u64 << exponent).min(max_ms);

        let jitter_max = scaled as f64 * self.jitter_ratio.clamp(0.0, 1.0);
        let jitter = (jitter_max * jitter_unit.clamp(0.0, 1.0)) as u64;
        Duration::from_millis(scaled.saturating_add(jitter))
    }

    /// [`delay`](Self::delay) with jitter drawn from the thread RNG.
    pub fn delay_random(&self, attempt: u32) -> Duration {
        self.delay(attempt, rand::thread_rng().gen::<f64>())
    }

    /// True once `retry_count` retries have been used up.
    pub fn exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.5,
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay(0, 0.0), Duration::ZERO);
        assert_eq!(p.delay(1, 0.0), Duration::from_millis(500));
        assert_eq!(p.delay(2, 0.0), Duration::from_millis(1_000));
        assert_eq!(p.delay(4, 0.0), Duration::from_millis(4_000));
        assert_eq!(p.delay(40, 0.0), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let p = policy();
        assert_eq!(p.delay(2, 1.0), Duration::from_millis(1_500));
        assert_eq!(p.delay(2, 7.0), Duration::from_millis(1_500));
        for _ in 0..50 {
            let d = p.delay_random(3);
            assert!(d >= Duration::from_millis(2_000) && d <= Duration::from_millis(3_000));
        }
    }

    #[test]
    fn test_exhausted() {
        let p = policy();
        assert!(!p.exhausted(5));
        assert!(p.exhausted(6));
    }
}
