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

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, AppResult};

/// One call as it travels on the wire.
///
/// Built by the client from a `RequestContext` right before sending and never
/// mutated afterwards. `request_uuid` identifies the call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub service: String,
    pub module: String,
    pub action: String,
    #[serde(default)]
    pub arg: Value,
    #[serde(rename = "requestUUID")]
    pub request_uuid: String,
    #[serde(default)]
    pub appid: String,
    #[serde(rename = "clientIP", default)]
    pub client_ip: String,
    #[serde(default)]
    pub sign: String,
    #[serde(rename = "clientArg", default)]
    pub client_arg: Value,
}

impl Request {
    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> AppResult<Request> {
        let request: Request = serde_json::from_slice(body)?;
        if request.service.is_empty() || request.module.is_empty() || request.action.is_empty() {
            return Err(AppError::MalformedProtocol(format!(
                "incomplete request path {}.{}.{}",
                request.service, request.module, request.action
            )));
        }
        Ok(request)
    }

    /// `arg` spread as positional arguments. A non-array payload counts as a
    /// single argument and `null` as none.
    pub fn positional_args(&self) -> Vec<Value> {
        match &self.arg {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    pub fn path(&self) -> String {
        format!("{}.{}.{}", self.service, self.module, self.action)
    }
}

/// Splits `service.module.action`. The action may not contain further dots.
pub fn parse_request_path(path: &str) -> AppResult<(String, String, String)> {
    let mut parts = path.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(service), Some(module), Some(action), None)
            if !service.is_empty() && !module.is_empty() && !action.is_empty() =>
        {
            Ok((service.to_string(), module.to_string(), action.to_string()))
        }
        _ => Err(AppError::InvalidValue(format!(
            "request path `{}` is not service.module.action",
            path
        ))),
    }
}
