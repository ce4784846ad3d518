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

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, trace};

use crate::protocol::{Request, Response, RpcResult, Status, ERR_CODE_INTERNAL};
use crate::{AppError, AppResult};

use super::module::ServiceModule;

/// Service-level hooks. `on_request` is where authentication lives.
#[async_trait]
pub trait ServiceHooks: Send + Sync {
    /// Returning false stops the call; the hook may fill `response` first.
    async fn on_request(&self, _request: &Request, _response: &mut Response) -> bool {
        true
    }

    async fn after_request(&self, _request: &Request, _response: &Response) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ServiceHooks for DefaultHooks {}

/// A named set of modules hosted by one serving process.
pub struct Service {
    name: String,
    modules: HashMap<String, ServiceModule>,
    hooks: Arc<dyn ServiceHooks>,
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            name: name.into(),
            modules: HashMap::new(),
            hooks: Arc::new(DefaultHooks),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self, name: &str) -> Option<&ServiceModule> {
        self.modules.get(name)
    }

    /// Authenticates, routes to the module, and converts escaped action
    /// failures into `SERVICE_ERROR`. `after_request` sees every outcome.
    pub async fn exec(&self, request: Arc<Request>, peer_ip: &str, debug: bool) -> Response {
        let mut response = Response::new(Status::Ok);
        self.dispatch(&request, peer_ip, &mut response, debug).await;
        self.hooks.after_request(&request, &response).await;
        trace!("{} answered {}", request.path(), response.status);
        response
    }

    async fn dispatch(&self, request: &Arc<Request>, peer_ip: &str, response: &mut Response, debug: bool) {
        if !self.hooks.on_request(request, response).await {
            if response.status.is_ok() {
                response.status = Status::Forbidden;
            }
            return;
        }

        let Some(module) = self.modules.get(&request.module) else {
            response.status = Status::ModuleNotExist;
            return;
        };

        if let Err(e) = module.exec(request, peer_ip, response, debug).await {
            error!("{} failed: {}", request.path(), e);
            response.status = Status::ServiceError;
            response.result = serde_json::to_value(RpcResult::error(ERR_CODE_INTERNAL, e.message()))
                .unwrap_or(Value::Null);
        }
    }
}

pub struct ServiceBuilder {
    name: String,
    modules: HashMap<String, ServiceModule>,
    hooks: Arc<dyn ServiceHooks>,
    errors: Vec<String>,
}

impl ServiceBuilder {
    pub fn module(mut self, module: ServiceModule) -> Self {
        let name = module.name().to_string();
        if self.modules.insert(name.clone(), module).is_some() {
            self.errors.push(format!("module {} registered twice", name));
        }
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ServiceHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> AppResult<Service> {
        if self.name.is_empty() {
            return Err(AppError::InvalidValue("service name is empty".into()));
        }
        if !self.errors.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "service {}: {}",
                self.name,
                self.errors.join(", ")
            )));
        }
        Ok(Service {
            name: self.name,
            modules: self.modules,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::request::{ActionError, ModuleHooks};

    fn request(module: &str, action: &str) -> Arc<Request> {
        Arc::new(Request {
            service: "Echo".into(),
            module: module.into(),
            action: action.into(),
            arg: Value::Null,
            request_uuid: "u-2".into(),
            appid: String::new(),
            client_ip: String::new(),
            sign: String::new(),
            client_arg: Value::Null,
        })
    }

    fn service(hooks: Arc<dyn ServiceHooks>) -> Service {
        let core = ServiceModule::builder("Core")
            .action("ping", |_| async { Ok(RpcResult::success("pong")) })
            .action("boom", |_| async { Err(ActionError::new("disk full")) })
            .build()
            .unwrap();
        Service::builder("Echo").module(core).hooks(hooks).build().unwrap()
    }

    #[tokio::test]
    async fn test_routes_to_action() {
        let response = service(Arc::new(DefaultHooks)).exec(request("Core", "ping"), "", false).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.rpc_result().unwrap().data, "pong");
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let response = service(Arc::new(DefaultHooks)).exec(request("Nope", "ping"), "", false).await;
        assert_eq!(response.status, Status::ModuleNotExist);
    }

    #[tokio::test]
    async fn test_action_error_becomes_service_error() {
        let response = service(Arc::new(DefaultHooks)).exec(request("Core", "boom"), "", false).await;
        assert_eq!(response.status, Status::ServiceError);
        assert_eq!(response.result["errCode"], ERR_CODE_INTERNAL);
        assert_eq!(response.result["message"], "disk full");
    }

    struct Gate {
        allow: bool,
        after: AtomicUsize,
    }

    #[async_trait]
    impl ServiceHooks for Gate {
        async fn on_request(&self, _request: &Request, _response: &mut Response) -> bool {
            self.allow
        }

        async fn after_request(&self, _request: &Request, _response: &Response) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_rejected_by_hook() {
        let gate = Arc::new(Gate {
            allow: false,
            after: AtomicUsize::new(0),
        });
        let response = service(gate.clone()).exec(request("Core", "ping"), "", false).await;
        assert_eq!(response.status, Status::Forbidden);
        assert_eq!(gate.after.load(Ordering::SeqCst), 1);
    }

    #[derive(Default)]
    struct ModuleCounter {
        exceptions: AtomicUsize,
        after: AtomicUsize,
    }

    #[async_trait]
    impl ModuleHooks for ModuleCounter {
        async fn after_request(&self, _request: &Request, _response: &Response) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }

        fn on_exception(&self, err: ActionError, _response: &mut Response) -> Result<(), ActionError> {
            self.exceptions.fetch_add(1, Ordering::SeqCst);
            Err(err)
        }
    }

    #[tokio::test]
    async fn test_panicking_action_still_runs_after_request() {
        let module_hooks = Arc::new(ModuleCounter::default());
        let core = ServiceModule::builder("Core")
            .action("crash", |_| async {
                let rows: Vec<i64> = Vec::new();
                if rows.is_empty() {
                    panic!("no rows");
                }
                Ok(RpcResult::success(rows))
            })
            .hooks(module_hooks.clone())
            .build()
            .unwrap();
        let gate = Arc::new(Gate {
            allow: true,
            after: AtomicUsize::new(0),
        });
        let service = Service::builder("Echo").module(core).hooks(gate.clone()).build().unwrap();

        let response = service.exec(request("Core", "crash"), "", false).await;
        assert_eq!(response.status, Status::ServiceError);
        assert_eq!(response.result["errCode"], ERR_CODE_INTERNAL);
        assert_eq!(response.result["message"], "no rows");
        assert_eq!(module_hooks.exceptions.load(Ordering::SeqCst), 1);
        assert_eq!(module_hooks.after.load(Ordering::SeqCst), 1);
        assert_eq!(gate.after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_module_refused() {
        let a = ServiceModule::builder("Core").build().unwrap();
        let b = ServiceModule::builder("Core").build().unwrap();
        assert!(Service::builder("Echo").module(a).module(b).build().is_err());
    }
}
