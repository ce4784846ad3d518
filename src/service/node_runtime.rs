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

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::registry::{NodeManager, ServiceNode};
use crate::request::RequestProcessor;
use crate::{AppError, AppResult};

use super::{RpcConfig, Server, Shutdown};

/// A serving process: the RPC server plus its registry presence.
pub struct NodeRuntime {
    config: RpcConfig,
    registry: Arc<dyn NodeManager>,
    processor: Arc<RequestProcessor>,
}

impl NodeRuntime {
    pub fn new(config: RpcConfig, registry: Arc<dyn NodeManager>, processor: RequestProcessor) -> Self {
        NodeRuntime {
            config,
            registry,
            processor: Arc::new(processor),
        }
    }

    /// The registry entry for this process listening on `port`.
    pub fn local_node(&self, port: u16) -> ServiceNode {
        ServiceNode::new(
            &self.config.node.service,
            self.config.advertise_ip(),
            port,
            self.config.node.version,
        )
        .with_node_id(self.config.node_id(port))
    }

    /// Serves until Ctrl-C.
    pub fn start(&self, rt: &Runtime) -> AppResult<()> {
        rt.block_on(self.run_until(async {
            if let Err(e) = signal::ctrl_c().await {
                error!("listen for ctrl-c failed: {}", e);
            }
        }))
    }

    pub async fn run_until<F>(&self, signal: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let listen_address = format!("{}:{}", self.config.network.ip, self.config.network.port);
        let listener = TcpListener::bind(&listen_address).await.map_err(|err| {
            let error_msg = format!(
                "Failed to bind server to address: {} - Error: {}",
                listen_address, err
            );
            error!("{}", error_msg);
            AppError::IllegalStateError(error_msg)
        })?;
        info!("tcp server binding to {} for listening", &listen_address);
        self.serve(listener, signal).await
    }

    /// Runs server and heartbeat on `listener` until `signal` resolves or
    /// accepting fails, then shuts both down and leaves the registry.
    pub async fn serve<F>(&self, listener: TcpListener, signal: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let node = self.local_node(listener.local_addr()?.port());
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);

        tokio::spawn(heartbeat(
            self.registry.clone(),
            node.clone(),
            Duration::from_secs(self.config.registry.heartbeat_interval.max(1)),
            Shutdown::new(notify_shutdown.subscribe()),
            shutdown_complete_tx.clone(),
        ));

        let server = Server::new(
            listener,
            notify_shutdown.clone(),
            shutdown_complete_tx,
            self.processor.clone(),
            self.config.network.clone(),
        );
        info!("node {} serving {} v{}", node.node_id, node.service, node.version);

        let result = tokio::select! {
            res = server.run() => {
                if let Err(err) = &res {
                    error!(cause = %err, "failed to accept");
                }
                res
            }
            _ = signal => {
                info!("get shutdown signal");
                Ok(())
            }
        };

        // stop accepting, then tell every handler and the heartbeat
        drop(server);
        if notify_shutdown.send(()).is_err() {
            trace!("no task left to notify");
        }
        trace!("waiting for shutdown complete...");
        shutdown_complete_rx.recv().await;

        if !self.registry.offline(&node).await {
            warn!("node {} could not leave the registry", node.node_id);
        }
        info!("node {} shutdown complete", node.node_id);
        result
    }
}

async fn heartbeat(
    registry: Arc<dyn NodeManager>,
    node: ServiceNode,
    period: Duration,
    mut shutdown: Shutdown,
    _shutdown_complete_tx: mpsc::Sender<()>,
) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if registry.alive(&node).await {
                    debug!("heartbeat of {} sent", node.node_id);
                } else {
                    warn!("heartbeat of {} not recorded", node.node_id);
                }
            }
            _ = shutdown.recv() => {
                debug!("heartbeat of {} stopped", node.node_id);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot;

    use super::*;
    use crate::registry::{MemoryHashStore, RedisNodeManager};
    use crate::request::echo_service;

    fn runtime(registry: Arc<RedisNodeManager>) -> NodeRuntime {
        let mut config = RpcConfig::default();
        config.network.ip = "127.0.0.1".into();
        config.node.node_id = "echo-test".into();
        config.node.version = 3;
        let mut processor = RequestProcessor::new(false);
        processor.register(echo_service().unwrap()).unwrap();
        NodeRuntime::new(config, registry, processor)
    }

    #[test]
    fn test_local_node() {
        let registry = Arc::new(RedisNodeManager::new(Arc::new(MemoryHashStore::new()), "t", 30));
        let node = runtime(registry).local_node(9300);
        assert_eq!(node.node_id, "echo-test");
        assert_eq!(node.address(), "127.0.0.1:9300");
        assert_eq!(node.service, "Echo");
        assert_eq!(node.version, 3);
    }

    #[test]
    fn test_local_node_id_follows_listener_port() {
        let registry = Arc::new(RedisNodeManager::new(Arc::new(MemoryHashStore::new()), "t", 30));
        let mut config = RpcConfig::default();
        config.network.ip = "127.0.0.1".into();
        config.network.port = 0;
        let node = NodeRuntime::new(config, registry, RequestProcessor::new(false)).local_node(41000);
        assert_eq!(node.node_id, "127.0.0.1:41000");
    }

    #[tokio::test]
    async fn test_heartbeat_then_offline() {
        let registry = Arc::new(RedisNodeManager::new(Arc::new(MemoryHashStore::new()), "t", 30));
        let runtime = Arc::new(runtime(registry.clone()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let serving = {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .serve(listener, async move {
                        let _ = stop_rx.await;
                    })
                    .await
            })
        };

        let mut registered = Vec::new();
        for _ in 0..50 {
            registered = registry.get_nodes("Echo", None).await;
            if !registered.is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].port, port);
        assert!(registered[0].last_heartbeat > 0);

        stop_tx.send(()).unwrap();
        serving.await.unwrap().unwrap();
        assert!(registry.get_nodes("Echo", None).await.is_empty());
    }
}
