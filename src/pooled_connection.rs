use crate::{Connection, Manager};
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::warn;

/// `last_use` value of a connection that is not leased
pub const NOT_LEASED: i64 = -1;

/// Wall-clock milliseconds since the UNIX epoch
#[inline]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Outcome of [`PooledConnection::force_close`]
#[derive(Debug)]
pub(crate) enum Teardown<E> {
    Closed,
    Failed(E),
    /// The holder is borrowing the connection; it is closed in the
    /// background once that borrow ends.
    Deferred,
    /// Already closed earlier
    Gone,
}

/// A physical connection owned by one pool, tagged with lease metadata.
///
/// The slot is `None` once the connection has been force-closed. Lease state
/// only changes inside pool operations that hold the pool lock.
pub struct PooledConnection<C> {
    id: u64,
    pub(crate) slot: Mutex<Option<C>>,
    in_use: AtomicBool,
    last_use: AtomicI64,
    /// Bumped on every lease so two leases in the same millisecond differ
    generation: AtomicU64,
}

impl<C: Connection> PooledConnection<C> {
    pub(crate) fn new(id: u64, conn: C) -> Self {
        Self {
            id,
            slot: Mutex::new(Some(conn)),
            in_use: AtomicBool::new(false),
            last_use: AtomicI64::new(NOT_LEASED),
            generation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Lease start in epoch millis, or [`NOT_LEASED`]
    pub fn last_use(&self) -> i64 {
        self.last_use.load(Ordering::SeqCst)
    }

    /// Number of times this connection has been leased
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Mark leased now and return the lease stamp.
    pub(crate) fn lease(&self) -> i64 {
        let now = now_millis();
        self.lease_at(now);
        now
    }

    pub(crate) fn lease_at(&self, now: i64) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.in_use.store(true, Ordering::SeqCst);
        self.last_use.store(now, Ordering::SeqCst);
    }

    pub(crate) fn expire(&self) {
        self.in_use.store(false, Ordering::SeqCst);
        self.last_use.store(NOT_LEASED, Ordering::SeqCst);
    }

    /// Leased and held for longer than `timeout` as of `now` (epoch millis).
    #[inline]
    pub fn is_overdue(&self, timeout: Duration, now: i64) -> bool {
        if !self.in_use() {
            return false;
        }
        let last_use = self.last_use();
        if last_use == NOT_LEASED {
            return false;
        }
        let timeout = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        now.saturating_sub(last_use) > timeout
    }

    /// Overdue and not proven alive by [`Manager::validate`].
    ///
    /// A connection its holder is using right now (slot locked) is never
    /// stale, nor is one that was already force-closed.
    pub async fn is_stale<M>(&self, manager: &M, timeout: Duration, now: i64) -> bool
    where
        M: Manager<Connection = C>,
    {
        if !self.is_overdue(timeout, now) {
            return false;
        }
        let Ok(mut slot) = self.slot.try_lock() else {
            return false;
        };
        match slot.as_mut() {
            Some(conn) => !manager.validate(conn).await,
            None => false,
        }
    }

    /// Physically close the connection without waiting on its holder.
    ///
    /// If the holder is borrowing the connection right now, a background task
    /// takes it once the borrow ends and closes it then. Must be called inside
    /// a tokio runtime.
    pub(crate) async fn force_close(self: &Arc<Self>) -> Teardown<C::Error> {
        self.expire();
        let conn = match self.slot.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                let this = self.clone();
                tokio::spawn(async move {
                    let conn = this.slot.lock().await.take();
                    if let Some(conn) = conn {
                        if let Err(e) = conn.close().await {
                            warn!(id = this.id, error = %e, "failed to close connection after its borrow ended");
                        }
                    }
                });
                return Teardown::Deferred;
            }
        };
        match conn {
            Some(conn) => match conn.close().await {
                Ok(()) => Teardown::Closed,
                Err(e) => Teardown::Failed(e),
            },
            None => Teardown::Gone,
        }
    }
}

impl<C> Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("in_use", &self.in_use.load(Ordering::Relaxed))
            .field("last_use", &self.last_use.load(Ordering::Relaxed))
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::{PooledConnection, Teardown, NOT_LEASED};
    use crate::{Connection, Manager};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct Stub {
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connection for Stub {
        type Statement = ();
        type Error = String;

        async fn prepare_statement(&mut self, _sql: &str) -> Result<(), String> {
            Ok(())
        }
        async fn create_statement(&mut self) -> Result<(), String> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<(), String> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<(), String> {
            Ok(())
        }
        async fn set_auto_commit(&mut self, _auto_commit: bool) -> Result<(), String> {
            Ok(())
        }
        async fn auto_commit(&mut self) -> Result<bool, String> {
            Ok(true)
        }
        async fn close(self) -> Result<(), String> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubManager {
        alive: bool,
    }

    #[async_trait]
    impl Manager for StubManager {
        type Connection = Stub;
        type Error = String;

        async fn connect(&self) -> Result<Stub, String> {
            Err("unused".to_string())
        }

        async fn validate(&self, _conn: &mut Stub) -> bool {
            self.alive
        }
    }

    fn stub() -> (Arc<PooledConnection<Stub>>, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let conn = PooledConnection::new(
            7,
            Stub {
                closed: closed.clone(),
            },
        );
        (Arc::new(conn), closed)
    }

    #[test]
    fn test_lease_and_expire() {
        let (c, _) = stub();
        assert!(!c.in_use());
        assert_eq!(c.last_use(), NOT_LEASED);
        c.lease_at(1_000);
        assert!(c.in_use());
        assert_eq!(c.last_use(), 1_000);
        assert_eq!(c.generation(), 1);
        c.expire();
        assert!(!c.in_use());
        assert_eq!(c.last_use(), NOT_LEASED);
    }

    #[test]
    fn test_overdue() {
        let (c, _) = stub();
        let timeout = Duration::from_millis(500);
        assert!(!c.is_overdue(timeout, 10_000));
        c.lease_at(1_000);
        assert!(!c.is_overdue(timeout, 1_500));
        assert!(c.is_overdue(timeout, 1_501));
        c.expire();
        assert!(!c.is_overdue(timeout, 100_000));
    }

    #[tokio::test]
    async fn test_stale_needs_failed_validation() {
        let (c, _) = stub();
        c.lease_at(0);
        let timeout = Duration::from_millis(10);
        assert!(c.is_stale(&StubManager { alive: false }, timeout, 100).await);
        assert!(!c.is_stale(&StubManager { alive: true }, timeout, 100).await);
        assert!(!c.is_stale(&StubManager { alive: false }, timeout, 5).await);
    }

    #[tokio::test]
    async fn test_not_stale_while_in_active_use() {
        let (c, _) = stub();
        c.lease_at(0);
        let _busy = c.slot.lock().await;
        assert!(
            !c.is_stale(&StubManager { alive: false }, Duration::ZERO, 100)
                .await
        );
    }

    #[tokio::test]
    async fn test_force_close_once() {
        let (c, closed) = stub();
        c.lease_at(0);
        assert!(matches!(c.force_close().await, Teardown::Closed));
        assert!(closed.load(Ordering::SeqCst));
        assert!(!c.in_use());
        assert!(matches!(c.force_close().await, Teardown::Gone));
    }

    #[test]
    fn test_overdue_with_unbounded_timeout() {
        let (c, _) = stub();
        c.lease_at(0);
        assert!(!c.is_overdue(Duration::MAX, i64::MAX));
        assert!(!c.is_overdue(Duration::from_millis(u64::MAX), i64::MAX));
    }

    #[tokio::test]
    async fn test_force_close_waits_out_borrow_in_background() {
        let (c, closed) = stub();
        c.lease_at(0);
        let busy = c.slot.lock().await;
        assert!(matches!(c.force_close().await, Teardown::Deferred));
        assert!(!c.in_use());
        assert!(!closed.load(Ordering::SeqCst));

        drop(busy);
        for _ in 0..100 {
            if closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed.load(Ordering::SeqCst));
        assert!(c.slot.lock().await.is_none());
    }
}
