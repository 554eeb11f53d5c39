use std::collections::HashMap;
use std::time::Duration;

/// Per-resource exponential delay for requeued reconciles
#[derive(Debug, Clone)]
pub struct RequeueBackoff {
    base: Duration,
    max: Duration,
    failures: HashMap<String, u32>,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(300))
    }
}

impl RequeueBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    /// Record another failure for `name` and return how long to wait
    pub fn next_delay(&mut self, name: &str) -> Duration {
        let failures = self.failures.entry(name.to_string()).or_insert(0);
        let shift = (*failures).min(31);
        *failures = failures.saturating_add(1);

        self.base
            .checked_mul(1u32 << shift)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Reset after a successful reconcile
    pub fn forget(&mut self, name: &str) {
        self.failures.remove(name);
    }

    pub fn failures(&self, name: &str) -> u32 {
        self.failures.get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_until_cap() {
        let mut backoff = RequeueBackoff::default();
        let delays: Vec<u64> = (0..12)
            .map(|_| backoff.next_delay("pool1").as_secs())
            .collect();
        assert_eq!(
            delays,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300, 300, 300]
        );
    }

    #[test]
    fn test_tracks_resources_separately() {
        let mut backoff = RequeueBackoff::default();
        backoff.next_delay("pool1");
        backoff.next_delay("pool1");
        assert_eq!(backoff.next_delay("pool2"), Duration::from_secs(1));
        assert_eq!(backoff.failures("pool1"), 2);
    }

    #[test]
    fn test_forget_resets() {
        let mut backoff = RequeueBackoff::default();
        backoff.next_delay("pool1");
        backoff.next_delay("pool1");
        backoff.forget("pool1");
        assert_eq!(backoff.failures("pool1"), 0);
        assert_eq!(backoff.next_delay("pool1"), Duration::from_secs(1));
    }

    #[test]
    fn test_many_failures_do_not_overflow() {
        let mut backoff = RequeueBackoff::default();
        for _ in 0..100 {
            backoff.next_delay("pool1");
        }
        assert_eq!(backoff.next_delay("pool1"), Duration::from_secs(300));
    }
}
