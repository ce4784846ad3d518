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

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const MAX_NODE_WEIGHT: i64 = 10;

/// One server instance advertising one service.
///
/// The registry stores everything but `node_id`, which is the hash field the
/// snapshot lives under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNode {
    pub service: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub version: i32,
    #[serde(skip)]
    pub node_id: String,
    #[serde(default)]
    pub last_heartbeat: i64,
    #[serde(default)]
    pub last_fail_time: i64,
}

impl ServiceNode {
    pub fn new(service: &str, ip: &str, port: u16, version: i32) -> Self {
        ServiceNode {
            service: service.to_string(),
            ip: ip.to_string(),
            port,
            version,
            node_id: format!("{}:{}", ip, port),
            last_heartbeat: 0,
            last_fail_time: 0,
        }
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_alive(&self, now: i64, ttl: i64) -> bool {
        now - self.last_heartbeat <= ttl
    }

    pub fn weight(&self, now: i64) -> i64 {
        node_weight(now, self.last_fail_time)
    }
}

/// Seconds since the last failure, saturating at `MAX_NODE_WEIGHT`.
///
/// A node that failed this second weighs 0, a node whose last failure is 10
/// or more seconds old (or that never failed) weighs 10.
pub fn node_weight(now: i64, last_fail_time: i64) -> i64 {
    (now - last_fail_time).clamp(0, MAX_NODE_WEIGHT)
}

/// Weighted random draw over `nodes`.
///
/// Draws `r` in `1..=total_weight` and walks the list subtracting weights
/// until `r` drops to zero or below, so a zero-weight node is never picked
/// while any node has a positive weight. When every node weighs zero the
/// draw falls back to a uniform pick.
pub fn select_weighted<'a, R: Rng>(
    nodes: &'a [ServiceNode],
    now: i64,
    rng: &mut R,
) -> Option<&'a ServiceNode> {
    if nodes.is_empty() {
        return None;
    }
    let total: i64 = nodes.iter().map(|node| node.weight(now)).sum();
    if total <= 0 {
        return nodes.get(rng.gen_range(0..nodes.len()));
    }
    let mut left = rng.gen_range(1..=total);
    for node in nodes {
        left -= node.weight(now);
        if left <= 0 {
            return Some(node);
        }
    }
    nodes.last()
}
