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

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::service::RegistryConfig;
use crate::AppResult;

use super::node::{select_weighted, ServiceNode};
use super::store::{HashStore, MemoryHashStore, RedisHashStore};

pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Node discovery and liveness bookkeeping.
///
/// Implementations never surface backend errors: an unreachable store reads
/// as "no nodes" and writes report `false`.
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// Every live node of `service`. When `version` is given, nodes running
    /// it come first.
    async fn get_nodes(&self, service: &str, version: Option<i32>) -> Vec<ServiceNode>;

    /// One live node, drawn by failure-aware weight among the nodes running
    /// `version`, or among all live nodes when none does.
    async fn get_node(&self, service: &str, version: Option<i32>) -> Option<ServiceNode> {
        let nodes = self.get_nodes(service, version).await;
        let nodes: Vec<ServiceNode> = match version {
            Some(version) if nodes.iter().any(|node| node.version == version) => nodes
                .into_iter()
                .filter(|node| node.version == version)
                .collect(),
            _ => nodes,
        };
        let now = unix_now();
        let mut rng = rand::thread_rng();
        select_weighted(&nodes, now, &mut rng).cloned()
    }

    /// Stamps `lastFailTime = now` on the node's entry.
    async fn fail_down(&self, node: &ServiceNode) -> bool;

    /// Removes the node's entry.
    async fn offline(&self, node: &ServiceNode) -> bool;

    /// Heartbeat: upserts the node with `lastHeartbeat = now, lastFailTime = 0`.
    async fn alive(&self, node: &ServiceNode) -> bool;
}

/// Registry kept in one hash per service, `{prefix}_{service}`, field =
/// node id, value = JSON snapshot of the node.
///
/// Every write is a single-field read-modify-write without locking, so a
/// `fail_down` racing an `alive` for the same node is last-write-wins.
/// Expired entries are removed lazily by the next `get_nodes` that sees them.
pub struct RedisNodeManager {
    store: Arc<dyn HashStore>,
    prefix: String,
    ttl: i64,
}

impl RedisNodeManager {
    pub fn new(store: Arc<dyn HashStore>, prefix: impl Into<String>, ttl: i64) -> Self {
        RedisNodeManager {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    /// Redis store for a non-empty `redis_url`, in-process store otherwise.
    pub fn from_config(config: &RegistryConfig) -> AppResult<Self> {
        let store: Arc<dyn HashStore> = if config.redis_url.is_empty() {
            info!("registry uses the in-process store");
            Arc::new(MemoryHashStore::new())
        } else {
            Arc::new(RedisHashStore::new(
                &config.redis_url,
                Duration::from_millis(config.connect_timeout_ms),
            )?)
        };
        Ok(Self::new(store, config.prefix.clone(), config.ttl))
    }

    pub fn registry_key(&self, service: &str) -> String {
        format!("{}_{}", self.prefix, service)
    }

    pub fn ttl(&self) -> i64 {
        self.ttl
    }
}

#[async_trait]
impl NodeManager for RedisNodeManager {
    async fn get_nodes(&self, service: &str, version: Option<i32>) -> Vec<ServiceNode> {
        let key = self.registry_key(service);
        let entries = match self.store.hgetall(&key).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("read registry {} failed: {}", key, e);
                return Vec::new();
            }
        };

        let now = unix_now();
        let mut live = Vec::with_capacity(entries.len());
        let mut expired = Vec::new();
        for (node_id, raw) in entries {
            match serde_json::from_str::<ServiceNode>(&raw) {
                Ok(node) if node.is_alive(now, self.ttl) => live.push(node.with_node_id(node_id)),
                Ok(_) => expired.push(node_id),
                Err(e) => {
                    warn!("drop undecodable registry entry {}/{}: {}", key, node_id, e);
                    expired.push(node_id);
                }
            }
        }

        for node_id in expired {
            debug!("evict expired node {} from {}", node_id, key);
            if let Err(e) = self.store.hdel(&key, &node_id).await {
                warn!("evict {} from {} failed: {}", node_id, key, e);
            }
        }

        live.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        if let Some(version) = version {
            live.sort_by_key(|node| node.version != version);
            if live.first().is_some_and(|node| node.version != version) {
                debug!("no {} node runs version {}", service, version);
            }
        }
        live
    }

    async fn fail_down(&self, node: &ServiceNode) -> bool {
        let key = self.registry_key(&node.service);
        let raw = match self.store.hget(&key, &node.node_id).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return false,
            Err(e) => {
                warn!("fail_down read {}/{} failed: {}", key, node.node_id, e);
                return false;
            }
        };
        let mut stored: ServiceNode = match serde_json::from_str(&raw) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("fail_down found undecodable entry {}/{}: {}", key, node.node_id, e);
                return false;
            }
        };
        stored.last_fail_time = unix_now();
        self.write(&key, &node.node_id, &stored).await
    }

    async fn offline(&self, node: &ServiceNode) -> bool {
        let key = self.registry_key(&node.service);
        match self.store.hdel(&key, &node.node_id).await {
            Ok(_) => {
                info!("node {} of {} went offline", node.node_id, node.service);
                true
            }
            Err(e) => {
                warn!("offline {}/{} failed: {}", key, node.node_id, e);
                false
            }
        }
    }

    async fn alive(&self, node: &ServiceNode) -> bool {
        let key = self.registry_key(&node.service);
        let snapshot = ServiceNode {
            last_heartbeat: unix_now(),
            last_fail_time: 0,
            ..node.clone()
        };
        self.write(&key, &node.node_id, &snapshot).await
    }
}

impl RedisNodeManager {
    async fn write(&self, key: &str, node_id: &str, node: &ServiceNode) -> bool {
        let value = match serde_json::to_string(node) {
            Ok(value) => value,
            Err(e) => {
                warn!("encode node {} failed: {}", node_id, e);
                return false;
            }
        };
        match self.store.hset(key, node_id, &value).await {
            Ok(_) => true,
            Err(e) => {
                warn!("write {}/{} failed: {}", key, node_id, e);
                false
            }
        }
    }
}
