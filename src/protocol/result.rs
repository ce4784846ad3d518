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

pub const ERR_CODE_SUCCESS: i32 = 0;
pub const ERR_CODE_INTERNAL: i32 = 500;

/// Business outcome returned by an action and embedded in `Response::result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResult {
    #[serde(rename = "errCode")]
    pub err_code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

impl RpcResult {
    pub fn success<T: Into<Value>>(data: T) -> Self {
        RpcResult {
            err_code: ERR_CODE_SUCCESS,
            message: String::new(),
            data: data.into(),
        }
    }

    pub fn error(err_code: i32, message: impl Into<String>) -> Self {
        RpcResult {
            err_code,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn is_success(&self) -> bool {
        self.err_code == ERR_CODE_SUCCESS
    }
}
