//! Connection statistics.
//!
//! Two concurrent tables: per-destination counters and per-connection rows,
//! updated from every open/close/request event in the connection lifecycle.
//! Counters are atomics so workers never contend on a lock; accuracy under
//! concurrent updates is best-effort except where noted (the longest-idle
//! figure is a monotonic max and never decreases).

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::dest::Destination;
use crate::ids::{ConnId, WorkerId};

/// Sentinel for "this connection has never been idle".
const IDLE_NEVER: u64 = u64::MAX;

#[derive(Default)]
struct DestCounters {
    requests: AtomicU64,
    opens: AtomicU64,
    connect_errors: AtomicU64,
    remote_closes: AtomicU64,
    local_closes: AtomicU64,
    lifetime_ms: AtomicU64,
}

struct ConnRow {
    dest: Destination,
    open_time: Instant,
    requests: AtomicU64,
    /// Millis since `open_time` when the last exchange ended; avoids a lock
    /// on the idle stamp.
    last_idle_offset_ms: AtomicU64,
    longest_idle_ms: AtomicU64,
    /// Raw id of the worker currently holding the socket; zero when idle.
    owner: AtomicU64,
}

impl ConnRow {
    fn new(dest: Destination) -> Self {
        Self {
            dest,
            open_time: Instant::now(),
            requests: AtomicU64::new(0),
            last_idle_offset_ms: AtomicU64::new(IDLE_NEVER),
            longest_idle_ms: AtomicU64::new(0),
            owner: AtomicU64::new(0),
        }
    }
}

/// Snapshot of one destination's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestTotals {
    pub requests: u64,
    pub opens: u64,
    pub connect_errors: u64,
    pub remote_closes: u64,
    pub local_closes: u64,
    pub cumulative_lifetime: Duration,
}

enum CloseKind {
    Remote,
    Local,
}

/// The shared statistics store. When disabled every record call is a no-op.
pub(crate) struct StatsStore {
    enabled: bool,
    dests: DashMap<Destination, DestCounters>,
    conns: DashMap<ConnId, ConnRow>,
}

impl StatsStore {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            dests: DashMap::new(),
            conns: DashMap::new(),
        }
    }

    pub(crate) fn open_connection(&self, dest: &Destination, conn: ConnId) {
        if !self.enabled {
            return;
        }
        self.dests
            .entry(dest.clone())
            .or_default()
            .opens
            .fetch_add(1, Ordering::Relaxed);
        self.conns.insert(conn, ConnRow::new(dest.clone()));
    }

    pub(crate) fn open_connection_error(&self, dest: &Destination) {
        if !self.enabled {
            return;
        }
        self.dests
            .entry(dest.clone())
            .or_default()
            .connect_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn close_connection_remote(&self, conn: ConnId) {
        self.close(conn, CloseKind::Remote);
    }

    pub(crate) fn close_connection_local(&self, conn: ConnId) {
        self.close(conn, CloseKind::Local);
    }

    /// A recv timeout is observed where the worker lives, so it is keyed by
    /// worker identity and resolved to the socket through the owner field.
    /// Counts as a local close.
    pub(crate) fn close_connection_timeout(&self, worker: WorkerId) {
        if !self.enabled {
            return;
        }
        let matches: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|row| row.owner.load(Ordering::Relaxed) == worker.as_u64())
            .map(|row| *row.key())
            .collect();

        match matches.as_slice() {
            [] => debug!(worker = %worker, "timeout close for unknown connection"),
            [conn] => self.close(*conn, CloseKind::Local),
            [conn, ..] => {
                warn!(
                    worker = %worker,
                    matches = matches.len(),
                    "multiple connections claim one worker, bookkeeping bug"
                );
                self.close(*conn, CloseKind::Local);
            }
        }
    }

    pub(crate) fn start_request(&self, dest: &Destination, conn: ConnId, worker: WorkerId) {
        if !self.enabled {
            return;
        }
        self.dests
            .entry(dest.clone())
            .or_default()
            .requests
            .fetch_add(1, Ordering::Relaxed);

        if !self.conns.contains_key(&conn) {
            warn!(conn = %conn, dest = %dest, "missing connection row, recreating");
            self.conns.insert(conn, ConnRow::new(dest.clone()));
        }
        if let Some(row) = self.conns.get(&conn) {
            row.requests.fetch_add(1, Ordering::Relaxed);
            row.owner.store(worker.as_u64(), Ordering::Relaxed);

            let last_idle = row.last_idle_offset_ms.load(Ordering::Relaxed);
            if last_idle != IDLE_NEVER {
                let now_ms = row.open_time.elapsed().as_millis() as u64;
                let idle_ms = now_ms.saturating_sub(last_idle);
                row.longest_idle_ms.fetch_max(idle_ms, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn end_request(&self, conn: ConnId) {
        if !self.enabled {
            return;
        }
        if let Some(row) = self.conns.get(&conn) {
            let offset = row.open_time.elapsed().as_millis() as u64;
            row.last_idle_offset_ms.store(offset, Ordering::Relaxed);
            row.owner.store(0, Ordering::Relaxed);
        }
    }

    fn close(&self, conn: ConnId, kind: CloseKind) {
        if !self.enabled {
            return;
        }
        let Some((_, row)) = self.conns.remove(&conn) else {
            debug!(conn = %conn, "close for connection with no row");
            return;
        };
        let lifetime_ms = row.open_time.elapsed().as_millis() as u64;
        let counters = self.dests.entry(row.dest.clone()).or_default();
        counters.lifetime_ms.fetch_add(lifetime_ms, Ordering::Relaxed);
        match kind {
            CloseKind::Remote => counters.remote_closes.fetch_add(1, Ordering::Relaxed),
            CloseKind::Local => counters.local_closes.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Counter snapshot for one destination.
    pub(crate) fn destination_totals(&self, dest: &Destination) -> Option<DestTotals> {
        let counters = self.dests.get(dest)?;
        Some(DestTotals {
            requests: counters.requests.load(Ordering::Relaxed),
            opens: counters.opens.load(Ordering::Relaxed),
            connect_errors: counters.connect_errors.load(Ordering::Relaxed),
            remote_closes: counters.remote_closes.load(Ordering::Relaxed),
            local_closes: counters.local_closes.load(Ordering::Relaxed),
            cumulative_lifetime: Duration::from_millis(
                counters.lifetime_ms.load(Ordering::Relaxed),
            ),
        })
    }

    /// Human-readable dump of both tables.
    pub(crate) fn dump(&self) -> String {
        if !self.enabled {
            return "statistics disabled\n".to_string();
        }

        let mut out = String::from("halyard connection statistics\n");
        for entry in self.dests.iter() {
            let c = entry.value();
            let _ = write!(
                out,
                "\n{}\n  requests: {}  opens: {}  connect errors: {}\n  \
                 remote closes: {}  local closes: {}  total lifetime: {:?}\n",
                entry.key(),
                c.requests.load(Ordering::Relaxed),
                c.opens.load(Ordering::Relaxed),
                c.connect_errors.load(Ordering::Relaxed),
                c.remote_closes.load(Ordering::Relaxed),
                c.local_closes.load(Ordering::Relaxed),
                Duration::from_millis(c.lifetime_ms.load(Ordering::Relaxed)),
            );
        }

        if !self.conns.is_empty() {
            out.push_str("\nopen connections:\n");
            for row in self.conns.iter() {
                let _ = write!(
                    out,
                    "  {}  {}  requests={} age={:?} longest_idle={:?}\n",
                    row.key(),
                    row.dest,
                    row.requests.load(Ordering::Relaxed),
                    row.open_time.elapsed(),
                    Duration::from_millis(row.longest_idle_ms.load(Ordering::Relaxed)),
                );
            }
        }
        out
    }
}
