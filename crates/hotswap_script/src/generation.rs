//! Context identity and liveness

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-wide monotonically increasing context identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl ContextId {
    pub(crate) fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of the most recently published context (0 before the first publish).
///
/// Contexts with an id lower than the published one are superseded; their
/// pending callbacks must never run.
#[derive(Debug, Default)]
pub struct Generation {
    current: AtomicU64,
}

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ContextId> {
        match self.current.load(Ordering::Acquire) {
            0 => None,
            id => Some(ContextId(id)),
        }
    }

    /// Publishing never moves backwards.
    pub fn publish(&self, id: ContextId) {
        self.current.fetch_max(id.0, Ordering::AcqRel);
    }

    pub fn is_superseded(&self, id: ContextId) -> bool {
        id.0 < self.current.load(Ordering::Acquire)
    }
}
