//! Per-destination connection pools.
//!
//! Each destination gets one pool actor owning the idle queue and the slot
//! counters; workers talk to it strictly request/response over a command
//! channel, so nothing outside the actor ever touches pool state. The
//! process-wide [`PoolRegistry`] maps destinations to live actors with
//! double-checked insertion.
//!
//! Admission never blocks: a checkout either hands back an idle socket,
//! reserves a slot for a fresh connect, or refuses outright.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::conn::Conn;
use crate::dest::Destination;
use crate::error::{HalyardError, HalyardResult};
use crate::ids::ConnId;
use crate::stats::StatsStore;

/// Command channel depth per pool actor.
const CHANNEL_BUFFER_SIZE: usize = 64;

/// Cadence of the idle scan (peer-close probe, idle timeout, lifetime).
const MAINTENANCE_INTERVAL: Duration = Duration::from_millis(500);

/// A pool with no connections and no traffic for this long terminates;
/// the registry respawns it on the next checkout.
const POOL_LINGER: Duration = Duration::from_secs(60);

pub(crate) enum PoolCmd {
    Checkout {
        reply: oneshot::Sender<CheckoutOutcome>,
    },
    Checkin {
        conn: Conn,
    },
    ReleaseSlot,
    Counts {
        reply: oneshot::Sender<(usize, usize)>,
    },
}

/// What a checkout hands the worker.
pub(crate) enum CheckoutOutcome {
    /// An idle keep-alive socket, most recently used first.
    Reuse(Conn),
    /// A slot is reserved; the worker performs the connect and must report
    /// failure back with a slot release.
    Connect,
    /// At capacity. Surfaced to the caller as `RetryLater`.
    Reject,
}

struct IdleConn {
    conn: Conn,
    since: Instant,
}

struct PoolManager {
    dest: Destination,
    cfg: PoolConfig,
    stats: Arc<StatsStore>,
    rx: mpsc::Receiver<PoolCmd>,
    /// Front is the most recently checked in: LIFO keeps hot sockets hot and
    /// lets cold ones age out from the back.
    idle: VecDeque<IdleConn>,
    checked_out: usize,
    last_activity: Instant,
}

impl PoolManager {
    fn total(&self) -> usize {
        self.checked_out + self.idle.len()
    }

    async fn run(mut self) {
        debug!(dest = %self.dest, max = self.cfg.max_connections, "pool started");
        let mut tick = interval(MAINTENANCE_INTERVAL);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = tick.tick() => {
                    self.maintain();
                    if self.total() == 0 && self.last_activity.elapsed() >= POOL_LINGER {
                        debug!(dest = %self.dest, "pool quiescent, terminating");
                        break;
                    }
                }
            }
        }

        for idle in self.idle.drain(..) {
            self.stats.close_connection_local(idle.conn.id);
        }
        debug!(dest = %self.dest, "pool terminated");
    }

    fn handle(&mut self, cmd: PoolCmd) {
        self.last_activity = Instant::now();
        match cmd {
            PoolCmd::Checkout { reply } => self.checkout(reply),
            PoolCmd::Checkin { conn } => self.checkin(conn),
            PoolCmd::ReleaseSlot => {
                self.checked_out = self.checked_out.saturating_sub(1);
            }
            PoolCmd::Counts { reply } => {
                let _ = reply.send((self.checked_out, self.idle.len()));
            }
        }
    }

    fn checkout(&mut self, reply: oneshot::Sender<CheckoutOutcome>) {
        if let Some(mut idle) = self.idle.pop_front() {
            idle.conn.request_count += 1;
            self.checked_out += 1;
            trace!(dest = %self.dest, conn = %idle.conn.id, "checkout: reuse");
            if let Err(outcome) = reply.send(CheckoutOutcome::Reuse(idle.conn)) {
                // The worker vanished between asking and listening; undo.
                if let CheckoutOutcome::Reuse(mut conn) = outcome {
                    conn.request_count -= 1;
                    self.checked_out -= 1;
                    self.idle.push_front(IdleConn {
                        conn,
                        since: Instant::now(),
                    });
                }
            }
            return;
        }

        if self.total() < self.cfg.max_connections {
            self.checked_out += 1;
            trace!(dest = %self.dest, total = self.total(), "checkout: slot reserved");
            if reply.send(CheckoutOutcome::Connect).is_err() {
                self.checked_out -= 1;
            }
            return;
        }

        trace!(dest = %self.dest, "checkout: rejected at capacity");
        let _ = reply.send(CheckoutOutcome::Reject);
    }

    fn checkin(&mut self, conn: Conn) {
        self.checked_out = self.checked_out.saturating_sub(1);

        if let Some(limit) = self.cfg.request_limit {
            if conn.request_count >= limit {
                debug!(dest = %self.dest, conn = %conn.id, served = conn.request_count,
                       "retiring connection at request limit");
                self.stats.close_connection_local(conn.id);
                return;
            }
        }
        if let Some(lifetime) = self.cfg.max_lifetime {
            if conn.age() >= lifetime {
                debug!(dest = %self.dest, conn = %conn.id, age = ?conn.age(),
                       "retiring connection past max lifetime");
                self.stats.close_connection_local(conn.id);
                return;
            }
        }
        if conn.probe_closed() {
            debug!(dest = %self.dest, conn = %conn.id, "checkin of dead socket");
            self.stats.close_connection_local(conn.id);
            return;
        }

        trace!(dest = %self.dest, conn = %conn.id, "checkin: idle");
        self.idle.push_front(IdleConn {
            conn,
            since: Instant::now(),
        });
    }

    /// One idle scan: drop sockets the peer closed, then enforce the idle
    /// timeout and the lifetime cap. Order within the queue is preserved.
    fn maintain(&mut self) {
        if self.idle.is_empty() {
            return;
        }
        let scanned: Vec<IdleConn> = self.idle.drain(..).collect();
        for idle in scanned {
            if idle.conn.probe_closed() {
                debug!(dest = %self.dest, conn = %idle.conn.id, "idle socket closed by peer");
                self.stats.close_connection_remote(idle.conn.id);
                continue;
            }
            if let Some(timeout) = self.cfg.idle_timeout {
                if idle.since.elapsed() >= timeout {
                    debug!(dest = %self.dest, conn = %idle.conn.id, "idle timeout");
                    self.stats.close_connection_local(idle.conn.id);
                    continue;
                }
            }
            if let Some(lifetime) = self.cfg.max_lifetime {
                if idle.conn.age() >= lifetime {
                    debug!(dest = %self.dest, conn = %idle.conn.id, "idle socket past max lifetime");
                    self.stats.close_connection_local(idle.conn.id);
                    continue;
                }
            }
            self.idle.push_back(idle);
        }
    }
}

/// Cloneable handle to one pool actor.
#[derive(Clone)]
pub(crate) struct PoolHandle {
    tx: mpsc::Sender<PoolCmd>,
}

impl PoolHandle {
    pub(crate) async fn checkout(&self) -> HalyardResult<CheckoutOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PoolCmd::Checkout { reply: reply_tx })
            .await
            .map_err(|_| HalyardError::Internal("pool terminated".to_string()))?;
        reply_rx
            .await
            .map_err(|_| HalyardError::Internal("pool dropped a checkout".to_string()))
    }

    pub(crate) async fn checkin(&self, conn: Conn) {
        let _ = self.tx.send(PoolCmd::Checkin { conn }).await;
    }

    pub(crate) async fn release_slot(&self) {
        let _ = self.tx.send(PoolCmd::ReleaseSlot).await;
    }

    /// Synchronous best-effort release, for drop paths that cannot await.
    fn release_slot_now(&self) {
        if self.tx.try_send(PoolCmd::ReleaseSlot).is_err() && !self.tx.is_closed() {
            warn!("pool command channel full, slot release lost");
        }
    }

    pub(crate) async fn counts(&self) -> (usize, usize) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(PoolCmd::Counts { reply: reply_tx })
            .await
            .is_err()
        {
            return (0, 0);
        }
        reply_rx.await.unwrap_or((0, 0))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Slot ownership for the duration of one exchange.
///
/// Workers check the socket back in (or report its demise) through this
/// guard; if the worker dies without doing either, the drop impl releases
/// the slot and records the connection as lost to the remote side.
pub(crate) struct CheckedOut {
    handle: PoolHandle,
    stats: Arc<StatsStore>,
    conn_id: Option<ConnId>,
    armed: bool,
}

impl CheckedOut {
    pub(crate) fn new(handle: PoolHandle, stats: Arc<StatsStore>, conn_id: Option<ConnId>) -> Self {
        Self {
            handle,
            stats,
            conn_id,
            armed: true,
        }
    }

    /// Track the socket currently tied to this slot (fresh connects and
    /// retry replacements).
    pub(crate) fn set_conn(&mut self, id: ConnId) {
        self.conn_id = Some(id);
    }

    /// Return a live socket to the pool; retirement policy is the pool's.
    pub(crate) async fn checkin(mut self, conn: Conn) {
        self.armed = false;
        self.handle.checkin(conn).await;
    }

    /// Release the slot after the worker already closed the socket and
    /// recorded the close event itself.
    pub(crate) async fn release(mut self) {
        self.armed = false;
        self.handle.release_slot().await;
    }
}

impl Drop for CheckedOut {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(id) = self.conn_id {
            debug!(conn = %id, "worker died holding a connection");
            self.stats.close_connection_remote(id);
        }
        self.handle.release_slot_now();
    }
}

/// Process-wide map from destination to pool actor.
pub(crate) struct PoolRegistry {
    pools: DashMap<Destination, PoolHandle>,
    stats: Arc<StatsStore>,
}

impl PoolRegistry {
    pub(crate) fn new(stats: Arc<StatsStore>) -> Self {
        Self {
            pools: DashMap::new(),
            stats,
        }
    }

    /// Look up or create the pool for a destination. The configuration only
    /// takes effect for the checkout that creates the pool.
    fn handle(&self, dest: &Destination, cfg: &PoolConfig) -> PoolHandle {
        if let Some(handle) = self.pools.get(dest) {
            if !handle.is_closed() {
                return handle.value().clone();
            }
        }
        match self.pools.entry(dest.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_closed() {
                    let handle = spawn_pool(dest.clone(), cfg.clone(), Arc::clone(&self.stats));
                    entry.insert(handle.clone());
                    handle
                } else {
                    entry.get().clone()
                }
            }
            Entry::Vacant(entry) => {
                let handle = spawn_pool(dest.clone(), cfg.clone(), Arc::clone(&self.stats));
                entry.insert(handle.clone());
                handle
            }
        }
    }

    pub(crate) async fn checkout(
        &self,
        dest: &Destination,
        cfg: &PoolConfig,
    ) -> HalyardResult<(CheckoutOutcome, PoolHandle)> {
        // A pool can terminate between lookup and send; one respawn settles it.
        for _ in 0..2 {
            let handle = self.handle(dest, cfg);
            match handle.checkout().await {
                Ok(outcome) => return Ok((outcome, handle)),
                Err(_) if handle.is_closed() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(HalyardError::Internal(
            "pool terminated during checkout".to_string(),
        ))
    }

    /// `(checked_out, idle)` for a destination, `(0, 0)` when no pool exists.
    pub(crate) async fn counts(&self, dest: &Destination) -> (usize, usize) {
        match self.pools.get(dest).map(|h| h.value().clone()) {
            Some(handle) => handle.counts().await,
            None => (0, 0),
        }
    }
}

fn spawn_pool(dest: Destination, cfg: PoolConfig, stats: Arc<StatsStore>) -> PoolHandle {
    let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let manager = PoolManager {
        dest,
        cfg,
        stats,
        rx,
        idle: VecDeque::new(),
        checked_out: 0,
        last_activity: Instant::now(),
    };
    tokio::spawn(manager.run());
    PoolHandle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectOptions;
    use crate::transport::Stream;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    async fn new_conn() -> (Conn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let dest = Destination::new("127.0.0.1", addr.port(), false);
        let stream = Stream::connect(&dest, &ConnectOptions::default(), None)
            .await
            .unwrap();
        (Conn::new(stream), accept.await.unwrap())
    }

    fn dest() -> Destination {
        Destination::new("pool.test", 80, false)
    }

    fn registry() -> (PoolRegistry, Arc<StatsStore>) {
        let stats = Arc::new(StatsStore::new(true));
        (PoolRegistry::new(Arc::clone(&stats)), stats)
    }

    #[tokio::test]
    async fn test_checkout_connect_then_reject_at_capacity() {
        let (registry, _) = registry();
        let cfg = PoolConfig {
            max_connections: 1,
            ..Default::default()
        };

        let (first, _handle) = registry.checkout(&dest(), &cfg).await.unwrap();
        assert!(matches!(first, CheckoutOutcome::Connect));

        let (second, _) = registry.checkout(&dest(), &cfg).await.unwrap();
        assert!(matches!(second, CheckoutOutcome::Reject));
    }

    #[tokio::test]
    async fn test_release_slot_frees_capacity() {
        let (registry, _) = registry();
        let cfg = PoolConfig {
            max_connections: 1,
            ..Default::default()
        };

        let (_, handle) = registry.checkout(&dest(), &cfg).await.unwrap();
        handle.release_slot().await;

        let (again, _) = registry.checkout(&dest(), &cfg).await.unwrap();
        assert!(matches!(again, CheckoutOutcome::Connect));
    }

    #[tokio::test]
    async fn test_checkin_then_reuse_increments_request_count() {
        let (registry, _) = registry();
        let cfg = PoolConfig::default();
        let (outcome, handle) = registry.checkout(&dest(), &cfg).await.unwrap();
        assert!(matches!(outcome, CheckoutOutcome::Connect));

        let (conn, _server) = new_conn().await;
        assert_eq!(conn.request_count, 1);
        handle.checkin(conn).await;
        assert_eq!(registry.counts(&dest()).await, (0, 1));

        let (outcome, _) = registry.checkout(&dest(), &cfg).await.unwrap();
        match outcome {
            CheckoutOutcome::Reuse(conn) => assert_eq!(conn.request_count, 2),
            _ => panic!("expected reuse of the idle socket"),
        }
        assert_eq!(registry.counts(&dest()).await, (1, 0));
    }

    #[tokio::test]
    async fn test_request_limit_retires_on_checkin() {
        let (registry, stats) = registry();
        let cfg = PoolConfig {
            request_limit: Some(1),
            ..Default::default()
        };
        let (_, handle) = registry.checkout(&dest(), &cfg).await.unwrap();

        let (conn, _server) = new_conn().await;
        let id = conn.id;
        stats.open_connection(&dest(), id);
        handle.checkin(conn).await;

        assert_eq!(registry.counts(&dest()).await, (0, 0));
        let totals = stats.destination_totals(&dest()).unwrap();
        assert_eq!(totals.local_closes, 1);
    }

    #[tokio::test]
    async fn test_idle_scan_detects_peer_close() {
        let (registry, stats) = registry();
        let cfg = PoolConfig::default();
        let (_, handle) = registry.checkout(&dest(), &cfg).await.unwrap();

        let (conn, mut server) = new_conn().await;
        let id = conn.id;
        stats.open_connection(&dest(), id);
        handle.checkin(conn).await;
        assert_eq!(registry.counts(&dest()).await, (0, 1));

        server.shutdown().await.unwrap();
        drop(server);

        tokio::time::sleep(MAINTENANCE_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(registry.counts(&dest()).await, (0, 0));
        let totals = stats.destination_totals(&dest()).unwrap();
        assert_eq!(totals.remote_closes, 1);
    }

    #[tokio::test]
    async fn test_idle_timeout_closes_locally() {
        let (registry, stats) = registry();
        let cfg = PoolConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };
        let (_, handle) = registry.checkout(&dest(), &cfg).await.unwrap();

        let (conn, _server) = new_conn().await;
        stats.open_connection(&dest(), conn.id);
        handle.checkin(conn).await;

        tokio::time::sleep(MAINTENANCE_INTERVAL + Duration::from_millis(200)).await;
        assert_eq!(registry.counts(&dest()).await, (0, 0));
        let totals = stats.destination_totals(&dest()).unwrap();
        assert_eq!(totals.local_closes, 1);
    }

    #[tokio::test]
    async fn test_guard_drop_releases_slot_and_records_loss() {
        let (registry, stats) = registry();
        let cfg = PoolConfig {
            max_connections: 1,
            ..Default::default()
        };
        let (_, handle) = registry.checkout(&dest(), &cfg).await.unwrap();

        let (conn, _server) = new_conn().await;
        let id = conn.id;
        stats.open_connection(&dest(), id);
        let guard = CheckedOut::new(handle.clone(), Arc::clone(&stats), Some(id));
        drop(conn);
        drop(guard);

        // The release is a try_send; give the actor a beat to process it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (again, _) = registry.checkout(&dest(), &cfg).await.unwrap();
        assert!(matches!(again, CheckoutOutcome::Connect));
        let totals = stats.destination_totals(&dest()).unwrap();
        assert_eq!(totals.remote_closes, 1);
    }
}
