//! Named counters shared between threads

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Thread-safe set of named monotonic counters.
///
/// Reads of a name that was never incremented return 0.
#[derive(Debug, Default)]
pub struct Counter {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock();
        match counters.get_mut(name) {
            Some(count) => *count += value,
            None => {
                counters.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_increment_and_get() {
        let counter = Counter::new();
        counter.increment("timers.scheduled", 1);
        counter.increment("timers.scheduled", 2);

        assert_eq!(counter.get("timers.scheduled"), 3);
        assert_eq!(counter.get("timers.dropped_stale"), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let counter = Arc::new(Counter::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        counter.increment("hits", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.get("hits"), 1000);
    }
}
