use async_trait::async_trait;
use lease_pool::{Connection, Credentials, Manager, Pool, PoolConfig};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
pub struct MemoryConnection {
    user: String,
    auto_commit: bool,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Statement = String;
    type Error = String;

    async fn prepare_statement(&mut self, sql: &str) -> Result<Self::Statement, Self::Error> {
        Ok(format!("{}: {}", self.user, sql))
    }

    async fn create_statement(&mut self) -> Result<Self::Statement, Self::Error> {
        Ok(format!("{}: <statement>", self.user))
    }

    async fn commit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
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
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryManager {
    credentials: Credentials,
}

#[async_trait]
impl Manager for MemoryManager {
    type Connection = MemoryConnection;
    type Error = String;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        Ok(MemoryConnection {
            user: self.credentials.user.clone(),
            auto_commit: true,
        })
    }
    //validate should run a round-trip query; the default treats overdue leases as dead
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let manager = MemoryManager {
        credentials: Credentials::new("scott", "tiger"),
    };
    let config = PoolConfig::on_demand(1, 4)
        .stale_timeout(Duration::from_millis(200))
        .reaper_interval(Duration::from_millis(100));
    let p = Pool::new(manager, config).await.unwrap();
    p.start_reaper().unwrap();
    println!("status = {}", p.state());

    let conn = p.acquire().await.unwrap();
    conn.set_auto_commit(false).await.unwrap();
    println!("stmt = {}", conn.prepare_statement("select 1").await.unwrap());
    conn.commit().await.unwrap();
    conn.close().unwrap();

    // an abandoned lease is reclaimed by the reaper
    let abandoned = p.acquire().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    println!("status = {}", p.state());
    println!("abandoned lease = {:?}", abandoned.commit().await);

    println!("close = {}", p.close().await);
}
