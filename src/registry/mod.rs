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

//! Service registry.
//!
//! Serving processes announce themselves with periodic heartbeats, callers
//! read the live set and draw one node weighted by how long ago it last
//! failed. Liveness is judged by the reader against a TTL; the store itself
//! never expires anything.

mod node;
mod node_manager;
mod store;

pub use node::{node_weight, select_weighted, ServiceNode, MAX_NODE_WEIGHT};
pub use node_manager::{unix_now, NodeManager, RedisNodeManager};
pub use store::{HashStore, MemoryHashStore, RedisHashStore};
