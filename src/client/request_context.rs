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

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::protocol::{parse_request_path, Request, Response};
use crate::registry::ServiceNode;
use crate::AppResult;

pub type ResponseCallback = Arc<dyn Fn(&RequestContext, &Response) + Send + Sync>;

/// Client-side state of one call.
///
/// Configured through chained setters after `Client::add_request`; after the
/// batch ran it also carries the resolved node and, if the call finished in
/// time, its response.
#[derive(Clone)]
pub struct RequestContext {
    service: String,
    module: String,
    action: String,
    service_version: Option<i32>,
    arg: Value,
    client_arg: Value,
    service_node: Option<ServiceNode>,
    appid: String,
    client_ip: String,
    sign: String,
    request_uuid: String,
    on_success: Option<ResponseCallback>,
    on_fail: Option<ResponseCallback>,
    /// Carried for callers that retry on their own; the dispatcher never
    /// reads it.
    retry_times: u32,
    response: Option<Response>,
}

impl RequestContext {
    pub fn new(path: &str, service_version: Option<i32>) -> AppResult<Self> {
        let (service, module, action) = parse_request_path(path)?;
        Ok(RequestContext {
            service,
            module,
            action,
            service_version,
            arg: Value::Null,
            client_arg: Value::Null,
            service_node: None,
            appid: String::new(),
            client_ip: String::new(),
            sign: String::new(),
            request_uuid: Uuid::new_v4().to_string(),
            on_success: None,
            on_fail: None,
            retry_times: 0,
            response: None,
        })
    }

    pub fn set_arg(&mut self, arg: impl Into<Value>) -> &mut Self {
        self.arg = arg.into();
        self
    }

    pub fn set_client_arg(&mut self, client_arg: impl Into<Value>) -> &mut Self {
        self.client_arg = client_arg.into();
        self
    }

    /// Pins the call to `node`, skipping the registry lookup.
    pub fn set_service_node(&mut self, node: ServiceNode) -> &mut Self {
        self.service_node = Some(node);
        self
    }

    pub fn set_service_version(&mut self, version: Option<i32>) -> &mut Self {
        self.service_version = version;
        self
    }

    pub fn set_appid(&mut self, appid: impl Into<String>) -> &mut Self {
        self.appid = appid.into();
        self
    }

    pub fn set_client_ip(&mut self, client_ip: impl Into<String>) -> &mut Self {
        self.client_ip = client_ip.into();
        self
    }

    pub fn set_sign(&mut self, sign: impl Into<String>) -> &mut Self {
        self.sign = sign.into();
        self
    }

    pub fn set_retry_times(&mut self, retry_times: u32) -> &mut Self {
        self.retry_times = retry_times;
        self
    }

    pub fn on_success<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&RequestContext, &Response) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_fail<F>(&mut self, callback: F) -> &mut Self
    where
        F: Fn(&RequestContext, &Response) + Send + Sync + 'static,
    {
        self.on_fail = Some(Arc::new(callback));
        self
    }

    pub fn request_path(&self) -> String {
        format!("{}.{}.{}", self.service, self.module, self.action)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn service_version(&self) -> Option<i32> {
        self.service_version
    }

    pub fn arg(&self) -> &Value {
        &self.arg
    }

    pub fn service_node(&self) -> Option<&ServiceNode> {
        self.service_node.as_ref()
    }

    pub fn appid(&self) -> &str {
        &self.appid
    }

    pub fn sign(&self) -> &str {
        &self.sign
    }

    pub fn request_uuid(&self) -> &str {
        &self.request_uuid
    }

    pub fn retry_times(&self) -> u32 {
        self.retry_times
    }

    /// `None` until a response arrived within the batch budget.
    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn build_request(&self) -> Request {
        Request {
            service: self.service.clone(),
            module: self.module.clone(),
            action: self.action.clone(),
            arg: self.arg.clone(),
            request_uuid: self.request_uuid.clone(),
            appid: self.appid.clone(),
            client_ip: self.client_ip.clone(),
            sign: self.sign.clone(),
            client_arg: self.client_arg.clone(),
        }
    }

    pub(crate) fn success_callback(&self) -> Option<ResponseCallback> {
        self.on_success.clone()
    }

    pub(crate) fn fail_callback(&self) -> Option<ResponseCallback> {
        self.on_fail.clone()
    }

    pub(crate) fn complete(&mut self, node: Option<ServiceNode>, response: Response) {
        if node.is_some() {
            self.service_node = node;
        }
        self.response = Some(response);
    }
}

impl Debug for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("path", &self.request_path())
            .field("service_version", &self.service_version)
            .field("request_uuid", &self.request_uuid)
            .field("service_node", &self.service_node)
            .field("response", &self.response)
            .finish()
    }
}
