use crate::pool::{Pool, PoolInner};
use crate::{Manager, PoolError};
use flume::{Receiver, Sender};
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle of a pool's background sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaperState {
    #[default]
    Idle,
    Running,
    Stopped,
}

/// Handle to the one background sweep task a pool may own.
///
/// The task keeps only a `Weak` reference to the pool so it can never keep a
/// discarded pool alive; it exits on the stop signal or once the pool is gone.
#[derive(Debug, Default)]
pub(crate) struct Reaper {
    state: ReaperState,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Reaper {
    pub(crate) fn state(&self) -> ReaperState {
        self.state
    }

    /// Idle -> Running. Outside a tokio runtime this fails with `NoRuntime`
    /// and the reaper stays idle.
    pub(crate) fn start<M: Manager>(
        &mut self,
        pool: Weak<PoolInner<M>>,
        interval: Duration,
    ) -> Result<(), PoolError<M::Error>> {
        if self.state != ReaperState::Idle {
            return Err(PoolError::ReaperAlreadyStarted);
        }
        let runtime = Handle::try_current().map_err(|_| PoolError::NoRuntime)?;
        let (stop_send, stop_recv) = flume::bounded(1);
        self.handle = Some(runtime.spawn(run(pool, interval, stop_recv)));
        self.stop = Some(stop_send);
        self.state = ReaperState::Running;
        info!(?interval, "reaper started");
        Ok(())
    }

    /// Running -> Stopped. Returns the task handle so the caller can wait for it.
    pub(crate) fn stop(&mut self) -> Option<JoinHandle<()>> {
        if self.state != ReaperState::Running {
            return None;
        }
        self.state = ReaperState::Stopped;
        if let Some(stop) = self.stop.take() {
            _ = stop.try_send(());
        }
        self.handle.take()
    }
}

async fn run<M: Manager>(pool: Weak<PoolInner<M>>, interval: Duration, stop: Receiver<()>) {
    loop {
        tokio::select! {
            _ = stop.recv_async() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let reaped = Pool { inner }.sweep().await;
        if reaped > 0 {
            debug!(reaped, "sweep finished");
        }
    }
    info!("reaper stopped");
}
