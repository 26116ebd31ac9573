use std::fmt::{Debug, Display};
use std::time::Duration;

/// Errors surfaced by the pool. `E` is the driver's error type, carried unchanged.
#[derive(Debug, thiserror::Error)]
pub enum PoolError<E> {
    /// The manager could not open a physical connection
    #[error("failed to create connection: {0}")]
    ConnectionCreationFailed(E),
    /// No connection became free before the deadline
    #[error("pool exhausted after waiting {waited:?}")]
    PoolExhausted { waited: Duration },
    #[error("pool is closed")]
    PoolClosed,
    #[error("reaper already started")]
    ReaperAlreadyStarted,
    /// The reaper was started from outside a tokio runtime
    #[error("no tokio runtime to run the reaper on")]
    NoRuntime,
    /// The cancellation token fired while waiting for a connection
    #[error("interrupted while waiting for a connection")]
    AcquireInterrupted,
    /// The lease was condemned by the reaper and its connection closed
    #[error("connection was reclaimed by the pool")]
    ConnectionReclaimed,
    /// A delegated call on a leased connection failed
    #[error("connection error: {0}")]
    Connection(E),
    #[error("invalid pool config: {0}")]
    InvalidConfig(&'static str),
}

impl<E: Debug + Display> PoolError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PoolError::PoolExhausted { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PoolError::PoolClosed)
    }
}
