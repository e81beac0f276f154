use std::time::Duration;

/// Largest exponent applied to a base delay (2^11 times the base).
const MAX_BACKOFF_EXPONENT: u32 = 11;

/// Calculate the delay before retry number `retry_count`.
///
/// Uses exponential backoff: `base * 2^retry_count`, with the exponent capped.
pub fn calculate_retry_delay(base: Duration, retry_count: u32) -> Duration {
    base.saturating_mul(2u32.pow(retry_count.min(MAX_BACKOFF_EXPONENT)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_calculation() {
        let base = Duration::from_millis(100);
        assert_eq!(calculate_retry_delay(base, 0), Duration::from_millis(100));
        assert_eq!(calculate_retry_delay(base, 1), Duration::from_millis(200));
        assert_eq!(calculate_retry_delay(base, 3), Duration::from_millis(800));
        assert_eq!(
            calculate_retry_delay(base, 11),
            Duration::from_millis(204_800)
        );
        // Max capped at 11
        assert_eq!(
            calculate_retry_delay(base, 12),
            Duration::from_millis(204_800)
        );
        assert_eq!(
            calculate_retry_delay(base, 100),
            Duration::from_millis(204_800)
        );
    }

    #[test]
    fn test_zero_base_never_waits() {
        assert_eq!(calculate_retry_delay(Duration::ZERO, 5), Duration::ZERO);
    }
}
