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

//! Network Module Implementation
//!
//! Byte-level plumbing shared by both ends of an RPC exchange.
//!
//! # Components
//!
//! - `pack`/`unpack` and `Frame`: the 4-byte big-endian length framing. Client
//!   and server use the same code so they are interchangeable at byte level.
//! - `Connection`: read side of an accepted server connection.
//! - `Transport`: single-use client connection doing exactly one exchange.

pub use connection::Connection;
pub use frame::{pack, unpack, Frame, FRAME_HEADER_SIZE};
pub use transport::Transport;
mod connection;
mod frame;
mod transport;
