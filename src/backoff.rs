//! Bounded exponential backoff shared by the bus connection, consumer
//! rebuilds and the platform client.

use std::time::Duration;

pub const BASE_DELAY: Duration = Duration::from_millis(100);
pub const MAX_DELAY: Duration = Duration::from_secs(30);

/// Delay before retry number `attempt` (1-based): 100ms doubling, capped at 30s.
#[must_use]
pub fn delay_for_attempt(attempt: usize) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16) as u32;
    BASE_DELAY
        .checked_mul(1u32 << exponent)
        .map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles() {
        assert_eq!(delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        assert_eq!(delay_for_attempt(10), MAX_DELAY);
        assert_eq!(delay_for_attempt(usize::MAX), MAX_DELAY);
    }
}
