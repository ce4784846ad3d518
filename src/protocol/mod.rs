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

//! RPC messages.
//!
//! Requests and responses are JSON documents; the framing that carries them
//! lives in `network`.

mod request;
mod response;
mod result;
mod status;

pub use request::{parse_request_path, Request};
pub use response::Response;
pub use result::{RpcResult, ERR_CODE_INTERNAL, ERR_CODE_SUCCESS};
pub use status::Status;
