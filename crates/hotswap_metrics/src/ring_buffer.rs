//! Bounded window of recent samples

use crate::Spread;
use std::collections::VecDeque;
use std::time::Duration;

/// Keeps the newest `capacity` samples; older ones fall off the front.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    window: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to one sample.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, sample: T) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
    }
}

impl RingBuffer<Duration> {
    pub fn spread(&self) -> Spread {
        let (Some(&fastest), Some(&slowest)) = (self.window.iter().min(), self.window.iter().max())
        else {
            return Spread::default();
        };
        let total: Duration = self.window.iter().sum();
        Spread {
            samples: self.window.len(),
            average: total / self.window.len() as u32,
            fastest,
            slowest,
        }
    }
}
