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

use serde_json::Value;

use crate::protocol::RpcResult;
use crate::AppResult;

use super::{Service, ServiceHooks, ServiceModule};

pub const ECHO_SERVICE: &str = "Echo";

/// Built-in `Echo` service: `Core.ping` answers "pong", `Core.echo`
/// returns its positional arguments.
pub fn echo_service() -> AppResult<Service> {
    echo_service_with_hooks(None)
}

pub fn echo_service_with_hooks(hooks: Option<Arc<dyn ServiceHooks>>) -> AppResult<Service> {
    let core = ServiceModule::builder("Core")
        .action("ping", |_| async { Ok(RpcResult::success("pong")) })
        .action("echo", |ctx| async move {
            Ok(RpcResult::success(Value::Array(ctx.args().to_vec())))
        })
        .build()?;

    let builder = Service::builder(ECHO_SERVICE).module(core);
    match hooks {
        Some(hooks) => builder.hooks(hooks).build(),
        None => builder.build(),
    }
}
