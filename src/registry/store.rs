// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{AppError, AppResult};

/// The slice of a key/value store the registry needs: one hash per key.
#[async_trait]
pub trait HashStore: Send + Sync {
    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>>;

    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()>;

    /// Returns whether the field existed.
    async fn hdel(&self, key: &str, field: &str) -> AppResult<bool>;
}

async fn get_connection(client: &Client, timeout: Duration) -> AppResult<MultiplexedConnection> {
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            Err(AppError::Timeout("redis connection".to_string()))
        }
        result = client.get_multiplexed_async_connection() => {
            Ok(result?)
        }
    }
}

/// Redis-backed store.
///
/// Keeps one multiplexed connection. Any failed command drops it so the next
/// call dials a fresh one.
pub struct RedisHashStore {
    client: Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl RedisHashStore {
    pub fn new(redis_url: &str, connect_timeout: Duration) -> AppResult<Self> {
        Ok(RedisHashStore {
            client: Client::open(redis_url)?,
            conn: Mutex::new(None),
            connect_timeout,
        })
    }

    async fn connection(&self) -> AppResult<MultiplexedConnection> {
        if let Some(conn) = self.conn.lock().await.as_ref() {
            return Ok(conn.clone());
        }
        // dial unlocked; when two callers race, the first stored connection wins
        let conn = get_connection(&self.client, self.connect_timeout).await?;
        let mut slot = self.conn.lock().await;
        let conn = slot.get_or_insert_with(|| {
            debug!("registry store connected");
            conn
        });
        Ok(conn.clone())
    }

    async fn reset(&self) {
        self.conn.lock().await.take();
    }

    async fn query<T: FromRedisValue + Send>(&self, cmd: &str, args: &[&str]) -> AppResult<T> {
        let mut conn = self.connection().await?;
        let result: Result<T, redis::RedisError> =
            redis::cmd(cmd).arg(args).query_async(&mut conn).await;
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("registry store command {} failed: {}", cmd, e);
                self.reset().await;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl HashStore for RedisHashStore {
    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>> {
        self.query("HGETALL", &[key]).await
    }

    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        self.query("HGET", &[key, field]).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()> {
        let _: usize = self.query("HSET", &[key, field, value]).await?;
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> AppResult<bool> {
        let removed: usize = self.query("HDEL", &[key, field]).await?;
        Ok(removed > 0)
    }
}

/// In-process store for single-node deployments and tests.
///
/// `set_available(false)` makes every call fail the way an unreachable
/// backend would.
#[derive(Default)]
pub struct MemoryHashStore {
    hashes: DashMap<String, HashMap<String, String>>,
    unavailable: AtomicBool,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AppError::DetailedIoError(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn hgetall(&self, key: &str) -> AppResult<HashMap<String, String>> {
        self.check()?;
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.value().clone())
            .unwrap_or_default())
    }

    async fn hget(&self, key: &str, field: &str) -> AppResult<Option<String>> {
        self.check()?;
        Ok(self
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> AppResult<()> {
        self.check()?;
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> AppResult<bool> {
        self.check()?;
        let removed = match self.hashes.get_mut(key) {
            Some(mut hash) => hash.remove(field).is_some(),
            None => false,
        };
        self.hashes.remove_if(key, |_, hash| hash.is_empty());
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::time::Instant;

    use super::*;

    #[tokio::test]
    async fn test_unresponsive_redis_dials_concurrently() {
        // accepts connections but never answers the handshake
        let silent = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("redis://{}", silent.local_addr().unwrap());
        let store = RedisHashStore::new(&url, Duration::from_millis(300)).unwrap();

        let started = Instant::now();
        let results =
            futures::future::join_all((0..4).map(|_| store.hgetall("rpc_registry_Echo"))).await;
        let elapsed = started.elapsed();

        assert!(results.iter().all(|r| matches!(r, Err(AppError::Timeout(_)))));
        assert!(elapsed < Duration::from_millis(900), "{:?}", elapsed);
    }

    #[tokio::test]
    async fn test_memory_hash_ops() {
        let store = MemoryHashStore::new();
        store.hset("k", "a", "1").await.unwrap();
        store.hset("k", "b", "2").await.unwrap();
        store.hset("k", "a", "3").await.unwrap();

        assert_eq!(store.hget("k", "a").await.unwrap().as_deref(), Some("3"));
        assert_eq!(store.hgetall("k").await.unwrap().len(), 2);
        assert!(store.hdel("k", "a").await.unwrap());
        assert!(!store.hdel("k", "a").await.unwrap());
        assert!(store.hget("missing", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_unavailable() {
        let store = MemoryHashStore::new();
        store.set_available(false);
        assert!(store.hgetall("k").await.is_err());
        assert!(store.hset("k", "a", "1").await.is_err());
        store.set_available(true);
        assert!(store.hset("k", "a", "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_redis_unreachable_is_an_error() {
        let store = RedisHashStore::new("redis://127.0.0.1:1/", Duration::from_millis(200)).unwrap();
        assert!(store.hgetall("k").await.is_err());
        // the failed dial left no cached connection behind
        assert!(store.conn.lock().await.is_none());
    }
}
