//! Reconnection timing after an unsolicited close.
//!
//! The default is a fixed 5 s delay with no retry cap. The exponential policy
//! is opt-in: capped doubling with random jitter so many agents restarting
//! together do not hit the server in lockstep.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_DELAY_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    Fixed {
        #[serde(default = "default_delay_secs")]
        delay_secs: u64,
    },
    Exponential {
        base_secs: u64,
        max_secs: u64,
        /// Fraction of the delay added as random jitter, 0.0–1.0.
        #[serde(default)]
        jitter: f64,
    },
}

fn default_delay_secs() -> u64 {
    DEFAULT_DELAY_SECS
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy::Fixed {
            delay_secs: DEFAULT_DELAY_SECS,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based, reset on
    /// every successful connect).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            ReconnectPolicy::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
            ReconnectPolicy::Exponential {
                base_secs,
                max_secs,
                jitter,
            } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let capped = base_secs.saturating_mul(factor).min(*max_secs);
                let base = Duration::from_secs(capped);
                let jitter = jitter.clamp(0.0, 1.0);
                if jitter == 0.0 || capped == 0 {
                    return base;
                }
                let extra = rand::thread_rng().gen_range(0.0..=jitter);
                base + base.mul_f64(extra)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_ignores_attempt_count() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(5));
        assert_eq!(policy.delay(40), Duration::from_secs(5));
    }

    #[test]
    fn exponential_policy_doubles_up_to_cap() {
        let policy = ReconnectPolicy::Exponential {
            base_secs: 1,
            max_secs: 30,
            jitter: 0.0,
        };
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(10), Duration::from_secs(30));
        assert_eq!(policy.delay(200), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::Exponential {
            base_secs: 4,
            max_secs: 60,
            jitter: 0.5,
        };
        for _ in 0..50 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(12));
        }
    }
}
