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

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Outcome of one RPC exchange, carried as an integer on the wire.
///
/// Transport failures (`ConnectTimeout`, `ServerTimeout`, `IllegalPackage`,
/// `ServiceShutdown`) are produced locally by the caller's transport, routing
/// failures (`ModuleNotExist`, `ActionNotExist`, `Forbidden`) by the serving
/// node. Business failures never show up here, they travel inside the result
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
#[repr(i32)]
pub enum Status {
    Ok = 0,
    NotAvailableNode = 1,
    ConnectTimeout = 2,
    ServerTimeout = 3,
    ServiceShutdown = 4,
    ServiceError = 5,
    IllegalPackage = 6,
    ModuleNotExist = 7,
    ActionNotExist = 8,
    Forbidden = 9,
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    /// Statuses that point at the node rather than at the request, so the
    /// application may want to `fail_down` the node that produced them.
    pub fn is_node_failure(&self) -> bool {
        matches!(
            self,
            Status::ConnectTimeout
                | Status::ServerTimeout
                | Status::ServiceShutdown
                | Status::ServiceError
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotAvailableNode => "NOT_AVAILABLE_NODE",
            Status::ConnectTimeout => "CONNECT_TIMEOUT",
            Status::ServerTimeout => "SERVER_TIMEOUT",
            Status::ServiceShutdown => "SERVICE_SHUTDOWN",
            Status::ServiceError => "SERVICE_ERROR",
            Status::IllegalPackage => "ILLEGAL_PACKAGE",
            Status::ModuleNotExist => "MODULE_NOT_EXIST",
            Status::ActionNotExist => "ACTION_NOT_EXIST",
            Status::Forbidden => "FORBIDDEN",
        }
    }
}

impl From<Status> for i32 {
    fn from(value: Status) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for Status {
    type Error = AppError;

    fn try_from(value: i32) -> AppResult<Self> {
        let status = match value {
            0 => Status::Ok,
            1 => Status::NotAvailableNode,
            2 => Status::ConnectTimeout,
            3 => Status::ServerTimeout,
            4 => Status::ServiceShutdown,
            5 => Status::ServiceError,
            6 => Status::IllegalPackage,
            7 => Status::ModuleNotExist,
            8 => Status::ActionNotExist,
            9 => Status::Forbidden,
            other => {
                return Err(AppError::MalformedProtocol(format!(
                    "unknown response status {}",
                    other
                )))
            }
        };
        Ok(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), *self as i32)
    }
}
