use crate::reaper::ReaperState;
use std::fmt::{Display, Formatter};

/// Point-in-time snapshot of a pool
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct State {
    /// Most connections the pool will hold at once
    pub capacity: u64,
    /// Connections held right now = free + leased
    pub connections: u64,
    /// Free connections ready to lease
    pub free: u64,
    /// Connections currently leased out
    pub leased: u64,
    /// Connections being opened on demand
    pub connecting: u64,
    /// Callers inside acquire
    pub waits: u64,
    /// Connections ever opened by this pool
    pub created: u64,
    /// Leases condemned by the reaper
    pub reaped: u64,
    /// Completed sweeps
    pub sweeps: u64,
    pub reaper: ReaperState,
    pub closed: bool,
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{{ capacity: {}, connections: {}, free: {}, leased: {}, connecting: {}, waits: {}, created: {}, reaped: {}, sweeps: {}, reaper: {:?}, closed: {} }}",
            self.capacity,
            self.connections,
            self.free,
            self.leased,
            self.connecting,
            self.waits,
            self.created,
            self.reaped,
            self.sweeps,
            self.reaper,
            self.closed
        )
    }
}
