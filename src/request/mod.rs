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

//! Server-side dispatch: frame body -> service -> module -> action.

mod echo;
mod module;
mod request_processor;
mod service;

pub use echo::{echo_service, echo_service_with_hooks, ECHO_SERVICE};
pub use module::{
    ActionContext, ActionError, ActionHandler, ActionResult, DefaultModuleHooks, ModuleHooks,
    ServiceModule, ServiceModuleBuilder, RESERVED_ACTIONS,
};
pub use request_processor::RequestProcessor;
pub use service::{DefaultHooks, Service, ServiceBuilder, ServiceHooks};
