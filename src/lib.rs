#[macro_use]
mod defer;
pub mod config;
pub mod credentials;
pub mod error;
pub mod guard;
pub mod pool;
pub mod pooled_connection;
pub mod reaper;
pub mod state;

use async_trait::async_trait;
use std::fmt::{Debug, Display};

/// A live database session handed out by a [`Manager`].
///
/// Callers reach it through a [`ConnectionGuard`], which only ever lends
/// `&mut` access. [`Connection::close`] takes the session by value, so only the
/// pool can physically close it.
#[async_trait]
pub trait Connection: Send + 'static {
    type Statement: Send;
    type Error: Debug + Display + Send + Sync + 'static;

    async fn prepare_statement(&mut self, sql: &str) -> Result<Self::Statement, Self::Error>;
    async fn create_statement(&mut self) -> Result<Self::Statement, Self::Error>;
    async fn commit(&mut self) -> Result<(), Self::Error>;
    async fn rollback(&mut self) -> Result<(), Self::Error>;
    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), Self::Error>;
    async fn auto_commit(&mut self) -> Result<bool, Self::Error>;

    /// Physically close the session.
    async fn close(self) -> Result<(), Self::Error>
    where
        Self: Sized;
}

/// Manager creates Connections and checks them for liveness
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Connection: Connection<Error = Self::Error>;

    type Error: Debug + Display + Send + Sync + 'static;

    ///open a new physical Connection
    async fn connect(&self) -> Result<Self::Connection, Self::Error>;

    /// Cheap liveness check used by the reaper on overdue leases.
    ///
    /// Returning `false` means the connection could not be shown to be alive,
    /// which lets the reaper condemn an overdue lease. Override it with a
    /// round-trip query to keep long-running but healthy leases.
    async fn validate(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub use config::{Growth, PoolConfig};
pub use credentials::Credentials;
pub use error::PoolError;
pub use guard::ConnectionGuard;
pub use pool::{CloseSummary, Pool};
pub use pooled_connection::PooledConnection;
pub use reaper::ReaperState;
pub use state::State;
pub use tokio_util::sync::CancellationToken;
