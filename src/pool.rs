use crate::config::PoolConfig;
use crate::guard::ConnectionGuard;
use crate::pooled_connection::{now_millis, PooledConnection, Teardown};
use crate::reaper::Reaper;
use crate::state::State;
use crate::{Manager, PoolError};
use dark_std::sync::AtomicDuration;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) type Entry<M> = Arc<PooledConnection<<M as Manager>::Connection>>;

/// Free and leased sets. Every connection the pool opened sits in exactly one
/// of them until the pool is closed or the reaper condemns it.
struct Slots<M: Manager> {
    free: VecDeque<Entry<M>>,
    leased: BTreeMap<u64, Entry<M>>,
    /// connections being opened on demand, counted against capacity
    connecting: usize,
    closed: bool,
}

impl<M: Manager> Slots<M> {
    fn total(&self) -> usize {
        self.free.len() + self.leased.len() + self.connecting
    }
}

pub(crate) struct PoolInner<M: Manager> {
    manager: M,
    config: PoolConfig,
    slots: Mutex<Slots<M>>,
    /// waiters park here; registered while `slots` is held so no wake is lost
    available: Notify,
    reaper: Mutex<Reaper>,
    next_id: AtomicU64,
    waits: AtomicU64,
    created: AtomicU64,
    reaped: AtomicU64,
    sweeps: AtomicU64,
    stale_timeout: AtomicDuration,
    acquire_timeout: AtomicDuration,
}

/// Result of tearing a pool down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseSummary {
    /// connections physically closed
    pub closed: usize,
    /// connections whose close returned an error
    pub failed: usize,
    /// connections borrowed at close time, closed once the borrow ends
    pub deferred: usize,
}

impl Display for CloseSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ closed: {}, failed: {}, deferred: {} }}",
            self.closed, self.failed, self.deferred
        )
    }
}

enum Step<M: Manager> {
    Leased(Entry<M>),
    Grow,
    Wait,
}

/// Pool leases connections from a Manager; acquire/acquire_timeout/try_acquire hand out guards
pub struct Pool<M: Manager> {
    pub(crate) inner: Arc<PoolInner<M>>,
}

impl<M: Manager> Debug for Pool<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        Debug::fmt(&state, f)
    }
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> Pool<M> {
    /// Build a pool and eagerly open `config.initial_size` connections.
    ///
    /// If any of them fails to open, the ones already opened are closed and the
    /// manager's error is returned as `ConnectionCreationFailed`.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError<M::Error>> {
        config.validate().map_err(PoolError::InvalidConfig)?;
        let initial_size = config.initial_size;
        let pool = Self {
            inner: Arc::new(PoolInner {
                manager,
                stale_timeout: AtomicDuration::new(Some(config.stale_timeout)),
                acquire_timeout: AtomicDuration::new(config.acquire_timeout),
                config,
                slots: Mutex::new(Slots {
                    free: VecDeque::with_capacity(initial_size),
                    leased: BTreeMap::new(),
                    connecting: 0,
                    closed: false,
                }),
                available: Notify::new(),
                reaper: Mutex::new(Reaper::default()),
                next_id: AtomicU64::new(1),
                waits: AtomicU64::new(0),
                created: AtomicU64::new(0),
                reaped: AtomicU64::new(0),
                sweeps: AtomicU64::new(0),
            }),
        };
        for _ in 0..initial_size {
            match pool.open().await {
                Ok(entry) => {
                    pool.inner.slots.lock().free.push_back(entry);
                }
                Err(e) => {
                    pool.close().await;
                    return Err(e);
                }
            }
        }
        debug!(initial_size, "pool ready");
        Ok(pool)
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Lease a connection, waiting at most the configured `acquire_timeout`.
    pub async fn acquire(&self) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.acquire_inner(self.inner.acquire_timeout.get(), None)
            .await
    }

    /// Lease a connection, waiting at most `d` (`None` waits forever).
    pub async fn acquire_timeout(
        &self,
        d: Option<Duration>,
    ) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.acquire_inner(d, None).await
    }

    /// Like [`Pool::acquire_timeout`], and gives up with `AcquireInterrupted`
    /// as soon as `cancel` fires while waiting.
    pub async fn acquire_cancellable(
        &self,
        d: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.acquire_inner(d, Some(cancel)).await
    }

    /// Lease a free connection (or open one, if growth allows) without waiting.
    pub async fn try_acquire(&self) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        self.acquire_inner(Some(Duration::ZERO), None).await
    }

    async fn acquire_inner(
        &self,
        d: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        let started = Instant::now();
        // a deadline too far out to represent is no deadline
        let deadline = d.and_then(|d| started.checked_add(d));
        self.inner.waits.fetch_add(1, Ordering::SeqCst);
        defer!(|| {
            self.inner.waits.fetch_sub(1, Ordering::SeqCst);
        });
        loop {
            let available = self.inner.available.notified();
            tokio::pin!(available);
            let step = {
                let mut slots = self.inner.slots.lock();
                if slots.closed {
                    return Err(PoolError::PoolClosed);
                }
                if let Some(entry) = slots.free.pop_front() {
                    entry.lease();
                    slots.leased.insert(entry.id(), entry.clone());
                    Step::<M>::Leased(entry)
                } else if self.can_grow(&slots) {
                    slots.connecting += 1;
                    Step::Grow
                } else {
                    available.as_mut().enable();
                    Step::Wait
                }
            };
            match step {
                Step::Leased(entry) => return Ok(ConnectionGuard::new(entry, self.clone())),
                Step::Grow => return self.grow().await,
                Step::Wait => {}
            }
            tokio::select! {
                _ = &mut available => {}
                _ = until(deadline) => {
                    return Err(PoolError::PoolExhausted {
                        waited: started.elapsed(),
                    });
                }
                _ = cancelled(cancel) => return Err(PoolError::AcquireInterrupted),
            }
        }
    }

    /// Room to open another connection: up to `max_size` for on-demand
    /// growth, or back up to `initial_size` after a fixed pool lost one to the
    /// reaper.
    fn can_grow(&self, slots: &Slots<M>) -> bool {
        slots.total() < self.inner.config.capacity()
    }

    /// Open one connection on behalf of a waiter and lease it straight away.
    /// The caller has already reserved a `connecting` slot.
    async fn grow(&self) -> Result<ConnectionGuard<M>, PoolError<M::Error>> {
        defer!(|| {
            self.inner.slots.lock().connecting -= 1;
            self.inner.available.notify_one();
        });
        let entry = self.open().await?;
        let closed = {
            let mut slots = self.inner.slots.lock();
            if !slots.closed {
                entry.lease();
                slots.leased.insert(entry.id(), entry.clone());
            }
            slots.closed
        };
        if closed {
            if let Teardown::Failed(e) = entry.force_close().await {
                warn!(id = entry.id(), error = %e, "failed to close connection opened during shutdown");
            }
            return Err(PoolError::PoolClosed);
        }
        Ok(ConnectionGuard::new(entry, self.clone()))
    }

    async fn open(&self) -> Result<Entry<M>, PoolError<M::Error>> {
        let conn = self
            .inner
            .manager
            .connect()
            .await
            .map_err(PoolError::ConnectionCreationFailed)?;
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        debug!(id, "opened connection");
        Ok(Arc::new(PooledConnection::new(id, conn)))
    }

    /// Move a lease back to the free set and wake one waiter.
    pub(crate) fn release(&self, entry: &Entry<M>) -> Result<(), PoolError<M::Error>> {
        {
            let mut slots = self.inner.slots.lock();
            if slots.closed {
                return Err(PoolError::PoolClosed);
            }
            let Some(entry) = slots.leased.remove(&entry.id()) else {
                return Err(PoolError::ConnectionReclaimed);
            };
            entry.expire();
            slots.free.push_back(entry);
        }
        self.inner.available.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.slots.lock().closed
    }

    /// Stop the reaper, then physically close every free and leased
    /// connection. Failures are logged and counted; teardown never stops early.
    /// A connection its holder is borrowing right now is not waited on: it is
    /// closed in the background once the borrow ends. Calling it again is a
    /// no-op.
    pub async fn close(&self) -> CloseSummary {
        self.stop_reaper().await;
        let drained: Vec<Entry<M>> = {
            let mut slots = self.inner.slots.lock();
            if slots.closed {
                return CloseSummary::default();
            }
            slots.closed = true;
            let mut drained: Vec<Entry<M>> = slots.free.drain(..).collect();
            drained.extend(std::mem::take(&mut slots.leased).into_values());
            drained
        };
        self.inner.available.notify_waiters();
        let mut summary = CloseSummary::default();
        for entry in drained {
            match entry.force_close().await {
                Teardown::Closed => summary.closed += 1,
                Teardown::Failed(e) => {
                    warn!(id = entry.id(), error = %e, "failed to close connection");
                    summary.failed += 1;
                }
                Teardown::Deferred => summary.deferred += 1,
                Teardown::Gone => {}
            }
        }
        info!(%summary, "pool closed");
        summary
    }

    /// Start the background sweep. Fails with `ReaperAlreadyStarted` unless the
    /// reaper has never been started, and with `NoRuntime` outside a tokio
    /// runtime.
    pub fn start_reaper(&self) -> Result<(), PoolError<M::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }
        self.inner
            .reaper
            .lock()
            .start(Arc::downgrade(&self.inner), self.inner.config.reaper_interval)
    }

    /// Stop the background sweep and wait for its task to finish.
    pub async fn stop_reaper(&self) {
        let handle = self.inner.reaper.lock().stop();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "reaper task failed");
            }
        }
    }

    /// Reclaim every lease held past the stale timeout that fails validation.
    ///
    /// Leases are snapshotted under the lock and validated outside it. A
    /// condemned lease is removed from the leased set only if it is still the
    /// same lease, and is never returned to the free set. Returns how many
    /// leases were reclaimed.
    pub async fn sweep(&self) -> usize {
        let timeout = self.stale_timeout();
        let now = now_millis();
        let snapshot: Vec<(Entry<M>, u64)> = {
            let slots = self.inner.slots.lock();
            if slots.closed {
                return 0;
            }
            slots
                .leased
                .values()
                .map(|e| (e.clone(), e.generation()))
                .collect()
        };
        let mut reaped = 0;
        for (entry, generation) in snapshot {
            if !entry.is_stale(&self.inner.manager, timeout, now).await {
                continue;
            }
            let condemned = {
                let mut slots = self.inner.slots.lock();
                if !slots.closed && entry.generation() == generation {
                    slots.leased.remove(&entry.id())
                } else {
                    None
                }
            };
            let Some(entry) = condemned else {
                continue;
            };
            let held_ms = now.saturating_sub(entry.last_use());
            if let Teardown::Failed(e) = entry.force_close().await {
                warn!(id = entry.id(), error = %e, "failed to close stale connection");
            }
            warn!(id = entry.id(), held_ms, "reclaimed stale lease");
            reaped += 1;
            // capacity freed up for a replacement
            self.inner.available.notify_one();
        }
        self.inner.reaped.fetch_add(reaped as u64, Ordering::SeqCst);
        self.inner.sweeps.fetch_add(1, Ordering::SeqCst);
        reaped
    }

    pub fn state(&self) -> State {
        let slots = self.inner.slots.lock();
        State {
            capacity: self.inner.config.capacity() as u64,
            connections: (slots.free.len() + slots.leased.len()) as u64,
            free: slots.free.len() as u64,
            leased: slots.leased.len() as u64,
            connecting: slots.connecting as u64,
            waits: self.inner.waits.load(Ordering::SeqCst),
            created: self.inner.created.load(Ordering::SeqCst),
            reaped: self.inner.reaped.load(Ordering::SeqCst),
            sweeps: self.inner.sweeps.load(Ordering::SeqCst),
            reaper: self.inner.reaper.lock().state(),
            closed: slots.closed,
        }
    }

    /// Ids of free connections, next to be leased first
    pub fn free_ids(&self) -> Vec<u64> {
        self.inner.slots.lock().free.iter().map(|e| e.id()).collect()
    }

    /// Ids of leased connections, ascending
    pub fn leased_ids(&self) -> Vec<u64> {
        self.inner.slots.lock().leased.keys().copied().collect()
    }

    /// Set how long a lease may be held before the reaper may reclaim it.
    pub fn set_stale_timeout(&self, timeout: Duration) {
        self.inner.stale_timeout.store(Some(timeout));
    }

    pub fn stale_timeout(&self) -> Duration {
        self.inner.stale_timeout.get().unwrap_or_default()
    }

    /// Set the deadline used by [`Pool::acquire`]. `None` (or a zero duration)
    /// waits forever; use [`Pool::try_acquire`] for a non-waiting lease.
    pub fn set_acquire_timeout(&self, timeout: Option<Duration>) {
        self.inner.acquire_timeout.store(timeout);
    }

    pub fn get_acquire_timeout(&self) -> Option<Duration> {
        self.inner.acquire_timeout.get()
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn cancelled(cancel: Option<&CancellationToken>) {
    match cancel {
        Some(cancel) => cancel.cancelled().await,
        None => std::future::pending().await,
    }
}
