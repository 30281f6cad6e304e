//! Reconnect schedule: fixed delay between tries, bounded attempt count

use std::time::Duration;

/// Delay between reconnection attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(1000);

/// Retries after a loss before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Reconnection settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub delay: Duration,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            enabled: true,
            delay,
            max_attempts,
        }
    }

    /// Never retry; a loss is immediately terminal
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before retry number `attempt` (1-based), or `None` once exhausted
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if self.enabled && attempt >= 1 && attempt <= self.max_attempts {
            Some(self.delay)
        } else {
            None
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

/// What the transport should do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Wait `delay`, then make retry number `attempt`
    Retry { attempt: u32, delay: Duration },
    /// All retries used (`attempts` made); stay down
    Exhausted { attempts: u32 },
    /// Policy does not retry at all
    Disabled,
}

/// Retry counter driven by the transport task.
///
/// `connected → (loss) → reconnecting → (success) → connected`, or
/// `reconnecting → (exhausted) → disconnected`.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure (lost connection or failed attempt) and decide
    pub fn next_step(&mut self) -> Step {
        if !self.policy.enabled {
            return Step::Disabled;
        }
        let next = self.attempt + 1;
        match self.policy.delay_for(next) {
            Some(delay) => {
                self.attempt = next;
                Step::Retry {
                    attempt: next,
                    delay,
                }
            }
            None => Step::Exhausted {
                attempts: self.attempt,
            },
        }
    }

    /// A connection succeeded; the next loss starts counting from zero
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries made since the last success
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.delay, Duration::from_millis(1000));
        assert_eq!(policy.max_attempts, 5);
    }

    #[test]
    fn test_fixed_delay_until_exhausted() {
        let mut backoff = Backoff::new(ReconnectPolicy::default());
        for expected in 1..=5 {
            assert_eq!(
                backoff.next_step(),
                Step::Retry {
                    attempt: expected,
                    delay: Duration::from_millis(1000)
                }
            );
        }
        assert_eq!(backoff.next_step(), Step::Exhausted { attempts: 5 });
        // Stays exhausted
        assert_eq!(backoff.next_step(), Step::Exhausted { attempts: 5 });
    }

    #[test]
    fn test_reset_after_success() {
        let mut backoff = Backoff::new(ReconnectPolicy::new(Duration::from_millis(10), 2));
        backoff.next_step();
        backoff.next_step();
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert!(matches!(backoff.next_step(), Step::Retry { attempt: 1, .. }));
    }

    #[test]
    fn test_disabled_policy() {
        let mut backoff = Backoff::new(ReconnectPolicy::disabled());
        assert_eq!(backoff.next_step(), Step::Disabled);
        assert_eq!(ReconnectPolicy::disabled().delay_for(1), None);
    }

    #[test]
    fn test_zero_attempts() {
        let mut backoff = Backoff::new(ReconnectPolicy::default().with_max_attempts(0));
        assert_eq!(backoff.next_step(), Step::Exhausted { attempts: 0 });
    }
}
