//! Reconnection backoff policy (§4.6.5).
//!
//! `delay(n) = min(base * 2^(n-1), max) * jitter`, jitter uniform in
//! `[1-r, 1+r]` for randomization factor `r`. `r == 0` disables jitter
//! entirely so scheduled delays are exactly reproducible (§8 scenario 6).

use std::time::Duration;

/// Compute the delay before reconnection attempt `attempt` (1-indexed),
/// sampling jitter from `sample` which must be in `[0, 1)`.
pub fn compute_delay_with_sample(
    attempt: u32,
    base: Duration,
    max: Duration,
    randomization_factor: f64,
    sample: f64,
) -> Duration {
    let exp = base.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let capped = exp.min(max.as_secs_f64());
    let jitter = if randomization_factor > 0.0 {
        let low = 1.0 - randomization_factor;
        let high = 1.0 + randomization_factor;
        low + sample * (high - low)
    } else {
        1.0
    };
    Duration::from_secs_f64((capped * jitter).max(0.0))
}

pub fn compute_delay(attempt: u32, base: Duration, max: Duration, randomization_factor: f64) -> Duration {
    compute_delay_with_sample(attempt, base, max, randomization_factor, rand::random())
}

/// Tracks reconnection attempt count and reports whether another attempt is
/// allowed (§6: `reconnection_attempts`, 0 meaning unlimited).
pub struct ReconnectPolicy {
    base: Duration,
    max: Duration,
    randomization_factor: f64,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub fn new(base: Duration, max: Duration, randomization_factor: f64, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            randomization_factor,
            max_attempts,
            attempt: 0,
        }
    }

    /// Advance to the next attempt and return its delay, or `None` once
    /// `max_attempts` has been exhausted (0 means unlimited).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(compute_delay(self.attempt, self.base, self.max, self.randomization_factor))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts_made(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unjittered_backoff_matches_scenario_six() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(4);
        let delays: Vec<Duration> = (1..=4)
            .map(|n| compute_delay_with_sample(n, base, max, 0.0, 0.5))
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(4),
            ]
        );
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(10);
        let low = compute_delay_with_sample(1, base, max, 0.5, 0.0);
        let high = compute_delay_with_sample(1, base, max, 0.5, 0.999);
        assert!(low.as_secs_f64() >= 0.5 - 1e-9);
        assert!(high.as_secs_f64() <= 1.5 + 1e-9);
    }

    #[test]
    fn policy_exhausts_after_max_attempts() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 0.0, 2);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
    }

    #[test]
    fn zero_max_attempts_means_unlimited() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 0.0, 0);
        for _ in 0..50 {
            assert!(policy.next_delay().is_some());
        }
    }

    #[test]
    fn reset_restarts_attempt_count() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 0.0, 1);
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        policy.reset();
        assert!(policy.next_delay().is_some());
    }
}
