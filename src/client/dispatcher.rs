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

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

use crate::auth::{make_sign, HmacSigner, Signer};
use crate::network::Transport;
use crate::protocol::{Request, Response, Status};
use crate::registry::{unix_now, NodeManager, ServiceNode};
use crate::service::ClientConfig;
use crate::AppResult;

use super::request_context::{RequestContext, ResponseCallback};

type CallOutcome = (usize, Option<ServiceNode>, Response);

/// Runs batches of calls concurrently under one deadline.
///
/// Contexts queued with [`Client::add_request`] are sent together by
/// [`Client::exec`]. Each call runs on its own task; outcomes are consumed
/// in completion order until every call reported or the budget ran out.
/// Calls still running at that point are abandoned, not cancelled: they end
/// at their own transport timeout and their result is dropped.
pub struct Client {
    registry: Arc<dyn NodeManager>,
    max_package_size: usize,
    timeout: Duration,
    credentials: Option<(String, String)>,
    signer: Arc<dyn Signer>,
    contexts: Vec<RequestContext>,
    last_batch: Vec<RequestContext>,
    on_success: Option<ResponseCallback>,
    on_fail: Option<ResponseCallback>,
}

impl Client {
    pub fn new(registry: Arc<dyn NodeManager>, max_package_size: usize) -> Self {
        Client {
            registry,
            max_package_size,
            timeout: Duration::from_secs(3),
            credentials: None,
            signer: Arc::new(HmacSigner),
            contexts: Vec::new(),
            last_batch: Vec::new(),
            on_success: None,
            on_fail: None,
        }
    }

    pub fn from_config(registry: Arc<dyn NodeManager>, config: &ClientConfig) -> Self {
        let mut client = Self::new(registry, config.max_package_size);
        client.timeout = config.timeout();
        if !config.appid.is_empty() {
            client = client.with_credentials(config.appid.clone(), config.secret.clone());
        }
        client
    }

    /// Signs every outgoing request that carries no signature of its own.
    pub fn with_credentials(mut self, appid: impl Into<String>, secret: impl Into<String>) -> Self {
        self.credentials = Some((appid.into(), secret.into()));
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    /// Budget used by [`Client::exec_default`].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Queues a call to `path` ("service.module.action") for the next batch.
    pub fn add_request(&mut self, path: &str, version: Option<i32>) -> AppResult<&mut RequestContext> {
        let context = RequestContext::new(path, version)?;
        self.contexts.push(context);
        let index = self.contexts.len() - 1;
        Ok(&mut self.contexts[index])
    }

    pub fn pending(&self) -> usize {
        self.contexts.len()
    }

    /// Fires after the per-context success callback of every call.
    pub fn on_success<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&RequestContext, &Response) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    /// Fires after the per-context failure callback of every call.
    pub fn on_fail<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&RequestContext, &Response) + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(callback));
        self
    }

    pub async fn exec_default(&mut self) -> usize {
        self.exec(self.timeout).await
    }

    /// Sends every queued call and waits at most `timeout` in total.
    ///
    /// Returns how many calls produced no result within the budget; those
    /// get no callback. The batch is available through
    /// [`Client::last_batch`] afterwards.
    pub async fn exec(&mut self, timeout: Duration) -> usize {
        let mut contexts = std::mem::take(&mut self.contexts);
        let total = contexts.len();
        if total == 0 {
            self.last_batch = contexts;
            return 0;
        }

        let (tx, rx) = async_channel::bounded::<CallOutcome>(total);
        for (index, context) in contexts.iter_mut().enumerate() {
            self.sign(context);
            let request = context.build_request();
            let node = context.service_node().cloned();
            let version = context.service_version();
            let registry = self.registry.clone();
            let max_package_size = self.max_package_size;
            let tx = tx.clone();
            tokio::spawn(async move {
                let (node, response) =
                    call(registry.as_ref(), request, node, version, max_package_size, timeout).await;
                if tx.send((index, node, response)).await.is_err() {
                    trace!("result of call #{} arrived after its batch ended", index);
                }
            });
        }
        drop(tx);

        let mut completed = 0;
        let mut left = timeout;
        let mut last_pop = Instant::now();
        while completed < total && !left.is_zero() {
            match time::timeout(left, rx.recv()).await {
                Ok(Ok((index, node, response))) => {
                    completed += 1;
                    let context = &mut contexts[index];
                    self.fire_callbacks(context, &response);
                    context.complete(node, response);
                }
                Ok(Err(_)) => break,
                Err(_) => {
                    debug!("batch budget {:?} exhausted, {} of {} calls pending", timeout, total - completed, total);
                    break;
                }
            }
            let now = Instant::now();
            left = left.saturating_sub(now - last_pop);
            last_pop = now;
        }

        self.last_batch = contexts;
        total - completed
    }

    /// Contexts of the most recent batch, in the order they were added.
    pub fn last_batch(&self) -> &[RequestContext] {
        &self.last_batch
    }

    /// Penalizes, through `fail_down`, every node whose call in the last
    /// batch ended with a node-level failure. Returns how many were marked.
    ///
    /// `exec` never does this on its own.
    pub async fn report_failures(&self) -> usize {
        let mut marked = 0;
        for context in &self.last_batch {
            let (Some(node), Some(response)) = (context.service_node(), context.response()) else {
                continue;
            };
            if response.status.is_node_failure() && self.registry.fail_down(node).await {
                marked += 1;
            }
        }
        marked
    }

    fn sign(&self, context: &mut RequestContext) {
        let Some((appid, secret)) = &self.credentials else {
            return;
        };
        if !context.sign().is_empty() {
            return;
        }
        match make_sign(self.signer.as_ref(), appid, secret, unix_now()) {
            Ok(sign) => {
                context.set_appid(appid.as_str()).set_sign(sign);
            }
            Err(e) => warn!("cannot sign request {}: {}", context.request_uuid(), e),
        }
    }

    fn fire_callbacks(&self, context: &RequestContext, response: &Response) {
        let (own, global) = if response.is_ok() {
            (context.success_callback(), self.on_success.as_ref())
        } else {
            (context.fail_callback(), self.on_fail.as_ref())
        };
        if let Some(callback) = own {
            callback(context, response);
        }
        if let Some(callback) = global {
            callback(context, response);
        }
    }
}

/// One exchange: resolve the node if none was pinned, connect, send, receive.
async fn call(
    registry: &dyn NodeManager,
    request: Request,
    node: Option<ServiceNode>,
    version: Option<i32>,
    max_package_size: usize,
    timeout: Duration,
) -> (Option<ServiceNode>, Response) {
    let node = match node {
        Some(node) => node,
        None => match registry.get_node(&request.service, version).await {
            Some(node) => node,
            None => {
                debug!("no live node for {}", request.service);
                return (None, Response::new(Status::NotAvailableNode));
            }
        },
    };

    let mut transport = Transport::new(max_package_size, timeout);
    if let Err(e) = transport.connect(&node).await {
        debug!("connect to {} failed: {}", node.address(), e);
        return (Some(node), Response::new(Status::ConnectTimeout));
    }
    if let Err(e) = transport.send(&request).await {
        debug!("send {} to {} failed: {}", request.request_uuid, node.address(), e);
        return (Some(node), Response::new(Status::ServiceShutdown));
    }
    let response = transport.receive(timeout).await;
    transport.close();
    (Some(node), response)
}
