use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::{aio::MultiplexedConnection, FromRedisValue};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::backend::{BackendStats, CacheBackend, CacheError};

const SCAN_BATCH: usize = 500;

/// Networked backend over a multiplexed connection.
///
/// The connection is established lazily and shared by cloning. After a failed connect
/// the backend refuses further attempts for `reconnect_interval`, so an unreachable
/// server costs one timeout per interval rather than one per operation.
pub struct RedisBackend {
    client: redis::Client,
    connection: ArcSwapOption<MultiplexedConnection>,
    last_connect_failure: Mutex<Option<Instant>>,
    connect_timeout: Duration,
    op_timeout: Duration,
    reconnect_interval: Duration,
}

impl RedisBackend {
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed. No connection is attempted.
    pub fn new(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)
            .map_err(|e| CacheError::Unavailable(format!("invalid cache url: {e}")))?;
        Ok(Self {
            client,
            connection: ArcSwapOption::empty(),
            last_connect_failure: Mutex::new(None),
            connect_timeout: Duration::from_secs(2),
            op_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_secs(5),
        })
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect: Duration, op: Duration, reconnect: Duration) -> Self {
        self.connect_timeout = connect;
        self.op_timeout = op;
        self.reconnect_interval = reconnect;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, CacheError> {
        if let Some(conn) = self.connection.load_full() {
            return Ok((*conn).clone());
        }

        let last_failure = *self.last_connect_failure.lock();
        if let Some(failed_at) = last_failure {
            if failed_at.elapsed() < self.reconnect_interval {
                return Err(CacheError::Unavailable("backing off after connect failure".into()));
            }
        }

        let connect = self.client.get_multiplexed_async_connection();
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(conn)) => {
                tracing::info!("cache connection established");
                *self.last_connect_failure.lock() = None;
                self.connection.store(Some(Arc::new(conn.clone())));
                Ok(conn)
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cache connection failed");
                *self.last_connect_failure.lock() = Some(Instant::now());
                Err(CacheError::Unavailable(e.to_string()))
            }
            Err(_) => {
                tracing::warn!("cache connection timed out");
                *self.last_connect_failure.lock() = Some(Instant::now());
                Err(CacheError::Unavailable("connect timed out".into()))
            }
        }
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, CacheError> {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(self.op_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
                    self.connection.store(None);
                }
                Err(CacheError::Unavailable(e.to_string()))
            }
            Err(_) => {
                self.connection.store(None);
                Err(CacheError::Unavailable("operation timed out".into()))
            }
        }
    }

    fn info_field(info: &str, field: &str) -> Option<u64> {
        info.lines().find_map(|line| {
            line.strip_prefix(field)
                .and_then(|rest| rest.strip_prefix(':'))
                .and_then(|value| value.trim().parse().ok())
        })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        self.query(redis::cmd("SET").arg(key).arg(value).arg("PX").arg(millis)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let removed: u64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(removed > 0)
    }

    async fn delete_by_prefix(&self, pattern: &str) -> Result<u64, CacheError> {
        let mut cursor = 0u64;
        let mut removed = 0u64;
        loop {
            let (next, keys): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;
            if !keys.is_empty() {
                let count: u64 = self.query(redis::cmd("DEL").arg(&keys)).await?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(pattern, removed, "cache prefix invalidated");
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let count: u64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, CacheError> {
        let value: i64 = self.query(redis::cmd("INCR").arg(key)).await?;
        if value == 1 {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let _: bool = self.query(redis::cmd("PEXPIRE").arg(key).arg(millis)).await?;
        }
        Ok(value)
    }

    async fn stats(&self) -> Result<BackendStats, CacheError> {
        let keys: u64 = self.query(&redis::cmd("DBSIZE")).await?;
        let memory: String = self.query(redis::cmd("INFO").arg("memory")).await?;
        let clients: String = self.query(redis::cmd("INFO").arg("clients")).await?;
        Ok(BackendStats {
            keys,
            memory_bytes: Self::info_field(&memory, "used_memory"),
            clients: Self::info_field(&clients, "connected_clients"),
        })
    }
}
