//! Bounded retries with a fixed delay
//!
//! The appliances fail in ways that clear up after a known pause (a console
//! switching cluster nodes, a listing racing a concurrent change), so retries
//! here are a fixed count at a fixed interval rather than exponential.

use backoff::backoff::Backoff;
use std::time::Duration;

/// [`Backoff`] policy allowing `retries` retries `delay` apart
#[derive(Debug, Clone)]
pub struct FixedRetries {
    delay: Duration,
    retries: u32,
    remaining: u32,
}

impl FixedRetries {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self {
            delay,
            retries,
            remaining: retries,
        }
    }

    /// Policy allowing `attempts` attempts in total
    pub fn attempts(attempts: u32, delay: Duration) -> Self {
        Self::new(attempts.saturating_sub(1), delay)
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }
}

impl Backoff for FixedRetries {
    fn reset(&mut self) {
        self.remaining = self.retries;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(self.delay)
    }
}

/// English ordinal suffix for retry logs (`1st`, `2nd`, `11th`)
pub fn ordinal(n: u32) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fixed_retries() {
        let mut policy = FixedRetries::new(2, Duration::from_secs(10));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(10)));
        assert_eq!(policy.next_backoff(), None);
        policy.reset();
        assert_eq!(policy.next_backoff(), Some(Duration::from_secs(10)));

        let mut policy = FixedRetries::attempts(1, Duration::ZERO);
        assert_eq!(policy.next_backoff(), None);
    }

    #[test]
    fn test_ordinal() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(2), "2nd");
        assert_eq!(ordinal(3), "3rd");
        assert_eq!(ordinal(4), "4th");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(22), "22nd");
    }

    #[tokio::test]
    async fn test_with_retry_notify() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = backoff::future::retry_notify(
            FixedRetries::new(3, Duration::ZERO),
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(backoff::Error::transient("busy"))
                } else {
                    Ok(n)
                }
            },
            |_: &str, _: Duration| {},
        )
        .await;
        assert_eq!(result, Ok(3));

        calls.store(0, Ordering::SeqCst);
        let result: Result<u32, &str> = backoff::future::retry_notify(
            FixedRetries::new(3, Duration::ZERO),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(backoff::Error::transient("busy"))
            },
            |_: &str, _: Duration| {},
        )
        .await;
        assert_eq!(result, Err("busy"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
