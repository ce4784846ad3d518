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
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::protocol::{Request, Response, RpcResult, Status, ERR_CODE_INTERNAL};
use crate::{AppError, AppResult};

use super::module::panic_message;
use super::Service;

/// Entry point for one decoded frame: finds the service and runs it.
#[derive(Default)]
pub struct RequestProcessor {
    services: HashMap<String, Arc<Service>>,
    debug: bool,
}

impl RequestProcessor {
    pub fn new(debug: bool) -> Self {
        RequestProcessor {
            services: HashMap::new(),
            debug,
        }
    }

    pub fn register(&mut self, service: Service) -> AppResult<()> {
        let name = service.name().to_string();
        if self.services.contains_key(&name) {
            return Err(AppError::IllegalStateError(format!(
                "service {} already registered",
                name
            )));
        }
        self.services.insert(name, Arc::new(service));
        Ok(())
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Always produces a response. A panic that escapes the service, such
    /// as one raised by a hook, is answered with `SERVICE_ERROR` and the
    /// connection stays usable.
    pub async fn process_request(&self, body: Bytes, peer_ip: &str) -> Response {
        let request = match Request::decode(&body) {
            Ok(request) => Arc::new(request),
            Err(e) => {
                debug!("undecodable request from {}: {}", peer_ip, e);
                return Response::new(Status::IllegalPackage);
            }
        };
        trace!("Processing request {} from {}", request.path(), peer_ip);

        let Some(service) = self.services.get(&request.service).cloned() else {
            debug!("service {} is not hosted here", request.service);
            return Response::new(Status::ServiceShutdown);
        };

        let debug = self.debug;
        let peer_ip = peer_ip.to_string();
        let path = request.path();
        let handle = tokio::spawn(async move { service.exec(request, &peer_ip, debug).await });
        match handle.await {
            Ok(response) => response,
            Err(join_error) => {
                let message = if join_error.is_panic() {
                    panic_message(&*join_error.into_panic())
                } else {
                    "action cancelled".to_string()
                };
                error!("{} panicked: {}", path, message);
                Response::with_result(
                    Status::ServiceError,
                    serde_json::to_value(RpcResult::error(ERR_CODE_INTERNAL, message))
                        .unwrap_or(Value::Null),
                )
            }
        }
    }
}
