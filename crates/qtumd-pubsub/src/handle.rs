use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque subscriber identity. The outer connection layer mints these
/// (typically one per live connection) and presents the same value back to
/// unsubscribe; the registry never inspects it beyond equality and ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberHandle(u64);

impl SubscriberHandle {
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

/// Mints process-unique [`SubscriberHandle`]s for callers that don't already
/// have a connection identifier to reuse.
#[derive(Debug, Default)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub const fn new() -> Self {
        Self { next: AtomicU64::new(0) }
    }

    pub fn next(&self) -> SubscriberHandle {
        SubscriberHandle(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
