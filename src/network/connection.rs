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

use std::io::{self, ErrorKind};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;

use crate::network::Frame;
use crate::AppResult;

/// Read side of an accepted connection.
///
/// Holds the peer address and a growable buffer; complete frames are cut out
/// of the buffer as soon as they are available.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_package_size: usize,
    pub client_ip: String,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, buffer_size: usize, max_package_size: usize) -> Connection {
        let client_ip = reader
            .peer_addr()
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            max_package_size,
            client_ip,
        }
    }

    /// Reads the next frame payload.
    ///
    /// `Ok(None)` means the peer closed the connection between two frames.
    /// A peer closing in the middle of a frame, or a frame above the size
    /// limit, is an error and the connection has to be dropped.
    pub async fn read_frame(&mut self) -> AppResult<Option<Bytes>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_package_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}
