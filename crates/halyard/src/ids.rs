//! Type-safe identifier newtypes.
//!
//! These prevent accidental mixing of connection and worker identities in
//! the statistics tables, where both are raw counters on the wire.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one pooled connection, allocated at socket open.
///
/// Keys the per-connection statistics row for the socket's whole lifetime,
/// across every worker that borrows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate the next process-wide connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ConnId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for owner-field storage in the statistics tables.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Identity of one request worker (one in-flight exchange).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Allocate the next process-wide worker id. Never zero; zero is the
    /// "no owner" sentinel in the per-connection statistics row.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        WorkerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}
