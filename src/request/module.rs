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

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{error, trace};

use crate::protocol::{Request, Response, RpcResult, Status};
use crate::{AppError, AppResult};

/// Names that can never be registered as actions.
pub const RESERVED_ACTIONS: &[&str] = &[
    "exec",
    "on_request",
    "after_request",
    "on_exception",
    "onRequest",
    "afterRequest",
    "onException",
];

/// Failure escaping an action. Business failures belong in an `RpcResult`
/// instead; this is for the unexpected.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        ActionError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AppError> for ActionError {
    fn from(value: AppError) -> Self {
        ActionError::new(value.to_string())
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(value: serde_json::Error) -> Self {
        ActionError::new(value.to_string())
    }
}

pub type ActionResult = Result<RpcResult, ActionError>;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What an action gets to see of the call.
#[derive(Debug, Clone)]
pub struct ActionContext {
    request: Arc<Request>,
    args: Vec<Value>,
    peer_ip: String,
}

impl ActionContext {
    pub fn new(request: Arc<Request>, peer_ip: impl Into<String>) -> Self {
        let args = request.positional_args();
        ActionContext {
            request,
            args,
            peer_ip: peer_ip.into(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    /// Address of the process that opened the connection.
    pub fn peer_ip(&self) -> &str {
        &self.peer_ip
    }
}

pub type ActionHandler = Arc<dyn Fn(ActionContext) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// Module lifecycle hooks; every method has a pass-through default.
#[async_trait]
pub trait ModuleHooks: Send + Sync {
    /// Returning false rejects the call before the action runs.
    async fn on_request(&self, _request: &Request) -> bool {
        true
    }

    /// Runs after every call, whatever its outcome.
    async fn after_request(&self, _request: &Request, _response: &Response) {}

    /// Sees every `ActionError`, including a panicking action turned into
    /// one. Returning it again hands it to the service,
    /// which answers `SERVICE_ERROR`; returning `Ok` keeps whatever this hook
    /// put into `response`.
    fn on_exception(&self, err: ActionError, _response: &mut Response) -> Result<(), ActionError> {
        Err(err)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultModuleHooks;

impl ModuleHooks for DefaultModuleHooks {}

/// A named group of actions.
///
/// The action table is the allow-list: only names registered through the
/// builder are reachable over RPC. Handlers are stateless closures, so the
/// module is shared between concurrent calls without copying.
pub struct ServiceModule {
    name: String,
    actions: HashMap<String, ActionHandler>,
    hooks: Arc<dyn ModuleHooks>,
}

impl ServiceModule {
    pub fn builder(name: impl Into<String>) -> ServiceModuleBuilder {
        ServiceModuleBuilder {
            name: name.into(),
            actions: HashMap::new(),
            hooks: Arc::new(DefaultModuleHooks),
            errors: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_allowed(&self, action: &str) -> bool {
        self.actions.contains_key(action)
    }

    pub fn action_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Runs the addressed action, then `after_request`.
    ///
    /// An `Err` is an action failure `on_exception` chose to propagate.
    pub async fn exec(
        &self,
        request: &Arc<Request>,
        peer_ip: &str,
        response: &mut Response,
        debug: bool,
    ) -> Result<(), ActionError> {
        let outcome = self.dispatch(request, peer_ip, response, debug).await;
        self.hooks.after_request(request, response).await;
        outcome
    }

    async fn dispatch(
        &self,
        request: &Arc<Request>,
        peer_ip: &str,
        response: &mut Response,
        debug: bool,
    ) -> Result<(), ActionError> {
        if !self.hooks.on_request(request).await {
            if response.status.is_ok() {
                response.status = Status::Forbidden;
            }
            return Ok(());
        }

        let Some(handler) = self.actions.get(&request.action) else {
            response.status = Status::ActionNotExist;
            return Ok(());
        };

        trace!("dispatch {} to module {}", request.path(), self.name);
        let started = Instant::now();
        let context = ActionContext::new(request.clone(), peer_ip);
        let outcome = match AssertUnwindSafe(handler(context)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(&*payload);
                error!("{} panicked: {}", request.path(), message);
                Err(ActionError::new(message))
            }
        };
        match outcome {
            Ok(result) => {
                let mut payload = serde_json::to_value(result)?;
                if debug {
                    if let Value::Object(map) = &mut payload {
                        map.insert(
                            "debug".to_string(),
                            json!({
                                "elapsedMs": started.elapsed().as_secs_f64() * 1000.0,
                                "requestUUID": request.request_uuid,
                            }),
                        );
                    }
                }
                response.status = Status::Ok;
                response.result = payload;
                Ok(())
            }
            Err(err) => self.hooks.on_exception(err, response),
        }
    }
}

pub struct ServiceModuleBuilder {
    name: String,
    actions: HashMap<String, ActionHandler>,
    hooks: Arc<dyn ModuleHooks>,
    errors: Vec<String>,
}

impl ServiceModuleBuilder {
    pub fn action<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        if name.is_empty() || name.starts_with("__") || RESERVED_ACTIONS.contains(&name) {
            self.errors.push(format!("`{}` is reserved", name));
            return self;
        }
        if self.actions.contains_key(name) {
            self.errors.push(format!("`{}` registered twice", name));
            return self;
        }
        let handler: ActionHandler = Arc::new(move |context| Box::pin(handler(context)));
        self.actions.insert(name.to_string(), handler);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ModuleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn build(self) -> AppResult<ServiceModule> {
        if !self.errors.is_empty() {
            return Err(AppError::InvalidValue(format!(
                "module {}: {}",
                self.name,
                self.errors.join(", ")
            )));
        }
        Ok(ServiceModule {
            name: self.name,
            actions: self.actions,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;

    use super::*;

    fn request(action: &str, arg: Value) -> Arc<Request> {
        Arc::new(Request {
            service: "Echo".into(),
            module: "Core".into(),
            action: action.into(),
            arg,
            request_uuid: "u-1".into(),
            appid: String::new(),
            client_ip: String::new(),
            sign: String::new(),
            client_arg: Value::Null,
        })
    }

    fn core() -> ServiceModule {
        ServiceModule::builder("Core")
            .action("ping", |_| async { Ok(RpcResult::success("pong")) })
            .action("add", |ctx| async move {
                let a = ctx.arg(0).and_then(Value::as_i64).unwrap_or_default();
                let b = ctx.arg(1).and_then(Value::as_i64).unwrap_or_default();
                Ok(RpcResult::success(a + b))
            })
            .action("boom", |_| async { Err(ActionError::new("database gone")) })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_positional_args() {
        let mut response = Response::new(Status::Ok);
        core()
            .exec(&request("add", json!([2, 40])), "127.0.0.1", &mut response, false)
            .await
            .unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.result["data"], 42);
        assert!(response.result.get("debug").is_none());
    }

    #[rstest]
    #[case("__construct")]
    #[case("__call")]
    #[case("onRequest")]
    #[case("afterRequest")]
    #[case("on_exception")]
    #[case("exec")]
    #[case("dispatch")]
    #[case("PING")]
    #[tokio::test]
    async fn test_unlisted_action(#[case] action: &str) {
        let mut response = Response::new(Status::Ok);
        core()
            .exec(&request(action, Value::Null), "127.0.0.1", &mut response, false)
            .await
            .unwrap();
        assert_eq!(response.status, Status::ActionNotExist);
    }

    #[rstest]
    #[case("__construct")]
    #[case("onRequest")]
    #[case("after_request")]
    #[case("")]
    fn test_reserved_names_refused(#[case] name: &str) {
        let result = ServiceModule::builder("Core")
            .action(name, |_| async { Ok(RpcResult::success(Value::Null)) })
            .build();
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }

    #[test]
    fn test_duplicate_action_refused() {
        let result = ServiceModule::builder("Core")
            .action("ping", |_| async { Ok(RpcResult::success(1)) })
            .action("ping", |_| async { Ok(RpcResult::success(2)) })
            .build();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_action_error_propagates_by_default() {
        let mut response = Response::new(Status::Ok);
        let err = core()
            .exec(&request("boom", Value::Null), "127.0.0.1", &mut response, false)
            .await
            .unwrap_err();
        assert_eq!(err.message(), "database gone");
    }

    #[tokio::test]
    async fn test_debug_telemetry() {
        let mut response = Response::new(Status::Ok);
        core()
            .exec(&request("ping", Value::Null), "127.0.0.1", &mut response, true)
            .await
            .unwrap();
        assert_eq!(response.result["data"], "pong");
        assert_eq!(response.result["debug"]["requestUUID"], "u-1");
        assert!(response.result["debug"]["elapsedMs"].is_number());
    }

    struct CountingHooks {
        allow: bool,
        after: AtomicUsize,
    }

    #[async_trait]
    impl ModuleHooks for CountingHooks {
        async fn on_request(&self, _request: &Request) -> bool {
            self.allow
        }

        async fn after_request(&self, _request: &Request, _response: &Response) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }

        fn on_exception(&self, err: ActionError, response: &mut Response) -> Result<(), ActionError> {
            response.status = Status::Ok;
            response.result = serde_json::to_value(RpcResult::error(500, err.message())).unwrap();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_hooks() {
        let hooks = Arc::new(CountingHooks {
            allow: true,
            after: AtomicUsize::new(0),
        });
        let module = ServiceModule::builder("Core")
            .action("boom", |_| async { Err(ActionError::new("bad input")) })
            .hooks(hooks.clone())
            .build()
            .unwrap();

        let mut response = Response::new(Status::Ok);
        module
            .exec(&request("boom", Value::Null), "127.0.0.1", &mut response, false)
            .await
            .unwrap();
        assert_eq!(response.result["errCode"], 500);
        assert_eq!(response.result["message"], "bad input");

        let mut response = Response::new(Status::Ok);
        module
            .exec(&request("missing", Value::Null), "127.0.0.1", &mut response, false)
            .await
            .unwrap();
        assert_eq!(hooks.after.load(Ordering::SeqCst), 2);

        let denying = ServiceModule::builder("Core")
            .action("boom", |_| async { Err(ActionError::new("never runs")) })
            .hooks(Arc::new(CountingHooks {
                allow: false,
                after: AtomicUsize::new(0),
            }))
            .build()
            .unwrap();
        let mut response = Response::new(Status::Ok);
        denying
            .exec(&request("boom", Value::Null), "127.0.0.1", &mut response, false)
            .await
            .unwrap();
        assert_eq!(response.status, Status::Forbidden);
    }
}
