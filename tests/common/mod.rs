#![allow(dead_code)]

use async_trait::async_trait;
use lease_pool::{Connection, Credentials, Manager, Pool};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct TestConnection {
    pub serial: u64,
    pub commits: u64,
    auto_commit: bool,
    closed: Arc<AtomicUsize>,
    fail_close: bool,
}

#[async_trait]
impl Connection for TestConnection {
    type Statement = String;
    type Error = String;

    async fn prepare_statement(&mut self, sql: &str) -> Result<Self::Statement, Self::Error> {
        Ok(format!("prepared:{}", sql))
    }

    async fn create_statement(&mut self) -> Result<Self::Statement, Self::Error> {
        Ok("statement".to_string())
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        if self.auto_commit {
            return Err("commit with auto-commit enabled".to_string());
        }
        self.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        if self.auto_commit {
            return Err("rollback with auto-commit enabled".to_string());
        }
        Ok(())
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), Self::Error> {
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn auto_commit(&mut self) -> Result<bool, Self::Error> {
        Ok(self.auto_commit)
    }

    async fn close(self) -> Result<(), Self::Error> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(format!("close failed for {}", self.serial));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TestManager {
    pub credentials: Credentials,
    pub connects: AtomicU64,
    pub closed: Arc<AtomicUsize>,
    /// refuse to connect once this many connections were opened
    pub connect_limit: AtomicU64,
    pub alive: AtomicBool,
    pub fail_close: AtomicBool,
}

impl TestManager {
    pub fn new() -> Self {
        Self::with_credentials(Credentials::new("scott", "tiger"))
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials,
            connects: AtomicU64::new(0),
            closed: Arc::new(AtomicUsize::new(0)),
            connect_limit: AtomicU64::new(u64::MAX),
            alive: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        }
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Manager for TestManager {
    type Connection = TestConnection;
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        if self.credentials.password != "tiger" {
            return Err(format!("access denied for {}", self.credentials.user));
        }
        let opened = self.connects.load(Ordering::SeqCst);
        if opened >= self.connect_limit.load(Ordering::SeqCst) {
            return Err("too many connections".to_string());
        }
        let serial = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(TestConnection {
            serial,
            commits: 0,
            auto_commit: true,
            closed: self.closed.clone(),
            fail_close: self.fail_close.load(Ordering::SeqCst),
        })
    }

    async fn validate(&self, _conn: &mut Self::Connection) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Poll until `n` callers are parked inside acquire.
pub async fn wait_for_waiters(pool: &Pool<TestManager>, n: u64) {
    for _ in 0..200 {
        if pool.state().waits >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} waiters, state = {}", n, pool.state());
}
