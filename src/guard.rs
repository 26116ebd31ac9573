use crate::pool::Entry;
use crate::{Connection, Manager, Pool, PoolError};
use std::fmt::{Debug, Formatter};
use tokio::sync::{MappedMutexGuard, MutexGuard};
use tracing::debug;

type Statement<M> = <<M as Manager>::Connection as Connection>::Statement;

/// ConnectionGuard is the caller's lease on a pooled Connection.
///
/// `close` (or dropping the guard) hands the connection back to the pool; it
/// never closes the physical connection.
pub struct ConnectionGuard<M: Manager> {
    entry: Option<Entry<M>>,
    pool: Pool<M>,
}

impl<M: Manager> ConnectionGuard<M> {
    pub(crate) fn new(entry: Entry<M>, pool: Pool<M>) -> ConnectionGuard<M> {
        Self {
            entry: Some(entry),
            pool,
        }
    }

    /// Pool-assigned id of the leased connection
    pub fn id(&self) -> u64 {
        self.entry.as_ref().map(|e| e.id()).unwrap_or_default()
    }

    /// Exclusive access to the underlying connection for as long as the
    /// returned guard lives. While it is held the reaper will not reclaim the
    /// lease.
    pub async fn conn(&self) -> Result<MappedMutexGuard<'_, M::Connection>, PoolError<M::Error>> {
        let Some(entry) = self.entry.as_ref() else {
            return Err(PoolError::ConnectionReclaimed);
        };
        let slot = entry.slot.lock().await;
        MutexGuard::try_map(slot, |conn| conn.as_mut()).map_err(|_| self.lost())
    }

    pub async fn prepare_statement(&self, sql: &str) -> Result<Statement<M>, PoolError<M::Error>> {
        self.conn()
            .await?
            .prepare_statement(sql)
            .await
            .map_err(PoolError::Connection)
    }

    pub async fn create_statement(&self) -> Result<Statement<M>, PoolError<M::Error>> {
        self.conn()
            .await?
            .create_statement()
            .await
            .map_err(PoolError::Connection)
    }

    pub async fn commit(&self) -> Result<(), PoolError<M::Error>> {
        self.conn()
            .await?
            .commit()
            .await
            .map_err(PoolError::Connection)
    }

    pub async fn rollback(&self) -> Result<(), PoolError<M::Error>> {
        self.conn()
            .await?
            .rollback()
            .await
            .map_err(PoolError::Connection)
    }

    pub async fn set_auto_commit(&self, auto_commit: bool) -> Result<(), PoolError<M::Error>> {
        self.conn()
            .await?
            .set_auto_commit(auto_commit)
            .await
            .map_err(PoolError::Connection)
    }

    pub async fn auto_commit(&self) -> Result<bool, PoolError<M::Error>> {
        self.conn()
            .await?
            .auto_commit()
            .await
            .map_err(PoolError::Connection)
    }

    /// Return the connection to the pool.
    ///
    /// Fails with `PoolClosed` after the pool was closed and with
    /// `ConnectionReclaimed` if the reaper already condemned this lease.
    pub fn close(mut self) -> Result<(), PoolError<M::Error>> {
        match self.entry.take() {
            Some(entry) => self.pool.release(&entry),
            None => Err(PoolError::ConnectionReclaimed),
        }
    }

    fn lost(&self) -> PoolError<M::Error> {
        if self.pool.is_closed() {
            PoolError::PoolClosed
        } else {
            PoolError::ConnectionReclaimed
        }
    }
}

impl<M: Manager> Debug for ConnectionGuard<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionGuard")
            .field("conn", &self.entry)
            .field("pool", &self.pool)
            .finish()
    }
}

impl<M: Manager> Drop for ConnectionGuard<M> {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.take() {
            if let Err(e) = self.pool.release(&entry) {
                debug!(id = entry.id(), error = %e, "lease dropped without return");
            }
        }
    }
}
