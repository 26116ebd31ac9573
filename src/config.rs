use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How the pool sizes itself beyond the connections opened at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Growth {
    /// Hold exactly `initial_size` connections. They are opened eagerly, and a
    /// connection the reaper reclaims is replaced on the next acquire.
    /// `max_size` only bounds `initial_size`.
    #[default]
    Fixed,
    /// Open `initial_size` eagerly, then open new connections on demand while
    /// the total stays below `max_size`.
    OnDemand,
}

/// Pool configuration
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolConfig {
    /// Connections opened by `Pool::new`
    pub initial_size: usize,
    /// Upper bound on connections the pool will ever hold at once
    pub max_size: usize,
    pub growth: Growth,
    /// Default deadline for `Pool::acquire`. `None` waits forever.
    #[cfg_attr(feature = "serde", serde(default))]
    pub acquire_timeout: Option<Duration>,
    /// A lease held longer than this is a reclaim candidate
    pub stale_timeout: Duration,
    /// Sleep between two reaper sweeps
    pub reaper_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let max_size = num_cpus::get();
        Self {
            initial_size: max_size,
            max_size,
            growth: Growth::Fixed,
            acquire_timeout: None,
            stale_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Fixed-size pool of `size` eagerly opened connections.
    pub fn fixed(size: usize) -> Self {
        Self {
            initial_size: size,
            max_size: size,
            growth: Growth::Fixed,
            ..Default::default()
        }
    }

    /// Pool that starts with `initial_size` and grows on demand up to `max_size`.
    pub fn on_demand(initial_size: usize, max_size: usize) -> Self {
        Self {
            initial_size,
            max_size,
            growth: Growth::OnDemand,
            ..Default::default()
        }
    }

    pub fn acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.max_size == 0 {
            return Err("max_size must be greater than 0");
        }
        if self.initial_size > self.max_size {
            return Err("initial_size must not exceed max_size");
        }
        if self.growth == Growth::Fixed && self.initial_size == 0 {
            return Err("a fixed pool needs at least one connection");
        }
        if self.acquire_timeout == Some(Duration::ZERO) {
            return Err("acquire_timeout must be greater than zero, use try_acquire instead");
        }
        if self.reaper_interval.is_zero() {
            return Err("reaper_interval must be greater than zero");
        }
        Ok(())
    }

    /// Total connections the pool may hold under this configuration.
    pub(crate) fn capacity(&self) -> usize {
        match self.growth {
            Growth::Fixed => self.initial_size,
            Growth::OnDemand => self.max_size,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{Growth, PoolConfig};
    use std::time::Duration;

    #[test]
    fn test_default_is_valid() {
        let c = PoolConfig::default();
        assert!(c.validate().is_ok());
        assert_eq!(c.growth, Growth::Fixed);
        assert_eq!(c.capacity(), c.initial_size);
    }

    #[test]
    fn test_reject_initial_above_max() {
        let c = PoolConfig::on_demand(5, 2);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_reject_zero() {
        assert!(PoolConfig::fixed(0).validate().is_err());
        assert!(PoolConfig::on_demand(0, 0).validate().is_err());
        assert!(PoolConfig::on_demand(0, 3).validate().is_ok());
        assert!(PoolConfig::fixed(1)
            .reaper_interval(Duration::ZERO)
            .validate()
            .is_err());
        assert!(PoolConfig::fixed(1)
            .acquire_timeout(Some(Duration::ZERO))
            .validate()
            .is_err());
    }

    #[test]
    fn test_capacity_per_growth() {
        assert_eq!(PoolConfig::on_demand(1, 8).capacity(), 8);
        let mut c = PoolConfig::fixed(3);
        c.max_size = 10;
        assert_eq!(c.capacity(), 3);
    }
}
