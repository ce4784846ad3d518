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

use crate::AppResult;

use super::{RpcResult, Status};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default)]
    pub result: Value,
}

impl Response {
    pub fn new(status: Status) -> Self {
        Response {
            status,
            result: Value::Null,
        }
    }

    pub fn with_result(status: Status, result: Value) -> Self {
        Response { status, result }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }

    /// Unwraps the embedded business result of a successful call.
    pub fn rpc_result(&self) -> Option<RpcResult> {
        if !self.status.is_ok() {
            return None;
        }
        serde_json::from_value(self.result.clone()).ok()
    }

    pub fn encode(&self) -> AppResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(body: &[u8]) -> AppResult<Response> {
        Ok(serde_json::from_slice(body)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_wire_shape() {
        let response = Response::with_result(Status::Ok, json!({"errCode": 0}));
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value, json!({"status": 0, "result": {"errCode": 0}}));
    }

    #[test]
    fn test_rpc_result_only_on_ok() {
        let payload = serde_json::to_value(RpcResult::success("pong")).unwrap();
        let ok = Response::with_result(Status::Ok, payload.clone());
        assert_eq!(ok.rpc_result().unwrap().data, json!("pong"));

        let failed = Response::with_result(Status::ServiceError, payload);
        assert!(failed.rpc_result().is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_status() {
        assert!(Response::decode(br#"{"status":77,"result":null}"#).is_err());
    }
}
