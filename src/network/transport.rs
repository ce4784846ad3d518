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

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, trace};

use crate::network::{pack, Frame};
use crate::protocol::{Request, Response, Status};
use crate::registry::ServiceNode;
use crate::{AppError, AppResult};

/// Single-use TCP transport: one connect, one request, one response.
///
/// Nothing is pooled or reused; the socket closes when the transport is
/// closed or dropped.
#[derive(Debug)]
pub struct Transport {
    stream: Option<TcpStream>,
    buffer: BytesMut,
    max_package_size: usize,
    timeout: Duration,
}

impl Transport {
    pub fn new(max_package_size: usize, timeout: Duration) -> Self {
        Transport {
            stream: None,
            buffer: BytesMut::with_capacity(4 * 1024),
            max_package_size,
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    pub async fn connect(&mut self, node: &ServiceNode) -> AppResult<()> {
        let address = node.address();
        let stream = time::timeout(self.timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| AppError::Timeout(format!("connect to {}", address)))??;
        stream.set_nodelay(true)?;
        trace!("transport connected to {}", address);
        self.stream = Some(stream);
        Ok(())
    }

    /// Serializes, frames and writes the request; fails on a short write.
    pub async fn send(&mut self, request: &Request) -> AppResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AppError::IllegalStateError("transport is not connected".into()))?;
        let frame = pack(&request.encode()?)?;
        if frame.len() > self.max_package_size + crate::network::FRAME_HEADER_SIZE {
            return Err(AppError::InvalidValue(format!(
                "request of {} bytes exceeds max package size {}",
                frame.len(),
                self.max_package_size
            )));
        }
        stream.write_all(&frame).await.map_err(|e| {
            AppError::DetailedIoError(format!("write request {} error: {}", request.request_uuid, e))
        })?;
        stream.flush().await?;
        Ok(())
    }

    /// Waits at most `timeout` for one framed response.
    ///
    /// Never fails: a timeout becomes `SERVER_TIMEOUT`, a malformed or
    /// oversized frame `ILLEGAL_PACKAGE`, a peer that went away
    /// `SERVICE_SHUTDOWN`.
    pub async fn receive(&mut self, timeout: Duration) -> Response {
        match time::timeout(timeout, self.read_response()).await {
            Ok(response) => response,
            Err(_) => {
                debug!("transport receive timed out after {:?}", timeout);
                Response::new(Status::ServerTimeout)
            }
        }
    }

    async fn read_response(&mut self) -> Response {
        let Some(stream) = self.stream.as_mut() else {
            return Response::new(Status::ServiceShutdown);
        };
        loop {
            match Frame::parse(&mut self.buffer, self.max_package_size) {
                Ok(Some(body)) => {
                    return Response::decode(&body).unwrap_or_else(|e| {
                        debug!("undecodable response: {}", e);
                        Response::new(Status::IllegalPackage)
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("illegal response frame: {}", e);
                    return Response::new(Status::IllegalPackage);
                }
            }
            match stream.read_buf(&mut self.buffer).await {
                Ok(0) if self.buffer.is_empty() => return Response::new(Status::ServiceShutdown),
                Ok(0) => return Response::new(Status::IllegalPackage),
                Ok(_) => {}
                Err(e) => {
                    debug!("transport read error: {}", e);
                    return Response::new(Status::ServiceShutdown);
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.stream.take();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.stream.is_some() {
            trace!("transport dropped with open socket");
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    use super::*;
    use crate::network::unpack;

    fn node_for(port: u16) -> ServiceNode {
        ServiceNode::new("Echo", "127.0.0.1", port, 1)
    }

    fn request() -> Request {
        Request {
            service: "Echo".into(),
            module: "Core".into(),
            action: "ping".into(),
            arg: json!([]),
            request_uuid: "u-1".into(),
            appid: String::new(),
            client_ip: String::new(),
            sign: String::new(),
            client_arg: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4];
            socket.read_exact(&mut buf).await.unwrap();
            let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await.unwrap();
            let mut frame = buf.clone();
            frame.extend_from_slice(&body);
            let request = Request::decode(&unpack(&frame).unwrap()).unwrap();
            assert_eq!(request.request_uuid, "u-1");
            let response = Response::with_result(Status::Ok, json!({"errCode": 0, "data": "pong"}));
            socket
                .write_all(&pack(&response.encode().unwrap()).unwrap())
                .await
                .unwrap();
        });

        let mut transport = Transport::new(1024, Duration::from_secs(1));
        transport.connect(&node_for(port)).await.unwrap();
        transport.send(&request()).await.unwrap();
        let response = transport.receive(Duration::from_secs(1)).await;
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.result["data"], json!("pong"));
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            time::sleep(Duration::from_secs(5)).await;
        });

        let mut transport = Transport::new(1024, Duration::from_secs(1));
        transport.connect(&node_for(port)).await.unwrap();
        transport.send(&request()).await.unwrap();
        let response = transport.receive(Duration::from_millis(100)).await;
        assert_eq!(response.status, Status::ServerTimeout);
    }

    #[tokio::test]
    async fn test_receive_oversized_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&pack(&[b'x'; 2048]).unwrap()).await.unwrap();
            time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(1024, Duration::from_secs(1));
        transport.connect(&node_for(port)).await.unwrap();
        let response = transport.receive(Duration::from_secs(1)).await;
        assert_eq!(response.status, Status::IllegalPackage);
    }

    #[tokio::test]
    async fn test_receive_garbage_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&pack(b"not json").unwrap()).await.unwrap();
            time::sleep(Duration::from_secs(1)).await;
        });

        let mut transport = Transport::new(1024, Duration::from_secs(1));
        transport.connect(&node_for(port)).await.unwrap();
        let response = transport.receive(Duration::from_secs(1)).await;
        assert_eq!(response.status, Status::IllegalPackage);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = Transport::new(1024, Duration::from_millis(500));
        assert!(transport.connect(&node_for(port)).await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_without_connect() {
        let mut transport = Transport::new(1024, Duration::from_millis(500));
        assert!(matches!(
            transport.send(&request()).await,
            Err(AppError::IllegalStateError(_))
        ));
    }
}
