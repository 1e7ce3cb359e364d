//! Hotswap Metrics - lightweight instrumentation for the script host
//!
//! Provides counters and sample buffers that completely vanish in
//! production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use hotswap_metrics::{Counter, RingBuffer};
//!
//! let counter = Counter::new();
//! counter.increment("swaps.completed", 1);
//!
//! let mut durations = RingBuffer::new(32);
//! durations.push(std::time::Duration::from_millis(4));
//! println!("avg swap: {:?}", durations.spread().average);
//! ```
//!
//! Without the `metrics` feature every call is a no-op and every read
//! returns zero.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod ring_buffer;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;

/// Summary of the samples currently held by a [`RingBuffer`] of durations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Spread {
    pub samples: usize,
    pub average: std::time::Duration,
    pub fastest: std::time::Duration,
    pub slowest: std::time::Duration,
}

// ============================================================================
// Macros for conditional compilation
// ============================================================================

/// Execute code only when metrics are enabled
#[macro_export]
macro_rules! metrics {
    ($($tt:tt)*) => {
        #[cfg(feature = "metrics")]
        {
            $($tt)*
        }
    };
}

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&self, _name: &str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug)]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
}

#[cfg(not(feature = "metrics"))]
impl RingBuffer<std::time::Duration> {
    pub fn spread(&self) -> Spread { Spread::default() }
}
