//! Retry / backoff policy

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Jitter bound as a fraction of the computed delay
pub const JITTER_RATIO: f64 = 0.1;

/// Upper bound on a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What to do with a job whose command just failed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Disposition {
    /// Put the job back in `pending`, not eligible for `delay`
    Retry { delay: Duration, attempts: u32 },
    /// Move the job to the dead-letter queue
    DeadLetter { attempts: u32 },
}

impl Disposition {
    /// Attempt count to persist with the transition
    pub fn attempts(&self) -> u32 {
        match self {
            Disposition::Retry { attempts, .. } | Disposition::DeadLetter { attempts } => *attempts,
        }
    }
}

/// Exponential backoff: `backoff_base ^ attempts` seconds, ±10% jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub backoff_base: u32,
}

impl RetryPolicy {
    pub fn new(backoff_base: u32) -> Self {
        Self { backoff_base }
    }

    /// Decide with a freshly drawn jitter factor
    pub fn decide(&self, attempts_before: u32, max_retries: u32) -> Disposition {
        let factor = rand::rng().random_range(-1.0..=1.0);
        self.decide_with_jitter(attempts_before, max_retries, factor)
    }

    /// Deterministic core of [`RetryPolicy::decide`].
    ///
    /// `jitter` is clamped to `[-1, 1]` and scales the ±10% perturbation.
    pub fn decide_with_jitter(
        &self,
        attempts_before: u32,
        max_retries: u32,
        jitter: f64,
    ) -> Disposition {
        let attempts = attempts_before.saturating_add(1);
        if attempts >= max_retries {
            return Disposition::DeadLetter { attempts };
        }

        let base = self.base_delay(attempts).as_secs_f64();
        let jitter = if jitter.is_finite() {
            jitter.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        let secs = (base + base * JITTER_RATIO * jitter).max(0.0);

        Disposition::Retry {
            delay: Duration::from_secs_f64(secs.min(MAX_BACKOFF.as_secs_f64())),
            attempts,
        }
    }

    /// Delay before jitter
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let secs = f64::from(self.backoff_base).powi(exponent);
        if !secs.is_finite() || secs >= MAX_BACKOFF.as_secs_f64() {
            MAX_BACKOFF
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BACKOFF_BASE)
    }
}

/// Free-function form: `decide(attempts_before, max_retries, backoff_base)`
pub fn decide(attempts_before: u32, max_retries: u32, backoff_base: u32) -> Disposition {
    RetryPolicy::new(backoff_base).decide(attempts_before, max_retries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry_delay(d: Disposition) -> Duration {
        match d {
            Disposition::Retry { delay, .. } => delay,
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_disposition_table() {
        // (attempts_before, max_retries, backoff_base, dead?, attempts, base delay secs)
        let cases: &[(u32, u32, u32, bool, u32, u64)] = &[
            (0, 3, 2, false, 1, 2),
            (1, 3, 2, false, 2, 4),
            (2, 3, 2, true, 3, 0),
            (5, 3, 2, true, 6, 0),
            (0, 1, 2, true, 1, 0),
            (0, 0, 2, true, 1, 0),
            (0, 2, 2, false, 1, 2),
            (1, 2, 2, true, 2, 0),
            (2, 5, 3, false, 3, 27),
            (3, 10, 1, false, 4, 1),
        ];

        for &(before, max, base, dead, attempts, secs) in cases {
            let d = RetryPolicy::new(base).decide_with_jitter(before, max, 0.0);
            assert_eq!(d.attempts(), attempts, "case {:?}", (before, max, base));
            if dead {
                assert_eq!(d, Disposition::DeadLetter { attempts });
            } else {
                assert_eq!(retry_delay(d), Duration::from_secs(secs));
            }
        }
    }

    #[test]
    fn test_jitter_extremes_are_ten_percent() {
        let policy = RetryPolicy::new(2);
        let low = retry_delay(policy.decide_with_jitter(1, 3, -1.0));
        let high = retry_delay(policy.decide_with_jitter(1, 3, 1.0));
        assert!((low.as_secs_f64() - 3.6).abs() < 1e-9);
        assert!((high.as_secs_f64() - 4.4).abs() < 1e-9);

        // Out-of-range factors are clamped
        let clamped = retry_delay(policy.decide_with_jitter(1, 3, 50.0));
        assert_eq!(clamped, high);
    }

    #[test]
    fn test_random_jitter_stays_within_bound() {
        for _ in 0..200 {
            let secs = retry_delay(decide(1, 3, 2)).as_secs_f64();
            assert!((3.6..=4.4).contains(&secs), "delay {} out of bounds", secs);
        }
    }

    #[test]
    fn test_huge_exponent_is_capped() {
        let policy = RetryPolicy::new(10);
        let delay = retry_delay(policy.decide_with_jitter(100, u32::MAX, 1.0));
        assert_eq!(delay, MAX_BACKOFF);
    }
}
