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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, trace};

use crate::network::{pack, Connection};
use crate::protocol::{Response, Status};
use crate::request::RequestProcessor;
use crate::AppError;
use crate::AppResult;

use super::{NetworkConfig, Shutdown};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

// handler for each connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    connection: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    processor: Arc<RequestProcessor>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            // a clean close between two frames yields None, anything else is an error
            let read = tokio::select! {
                res = self.connection.read_frame() => res,
                _ = shutdown.recv() => {
                    debug!("connection {} exit read loop after recv shutdown signal", self.connection_id);
                    return Ok(());
                }
            };

            let body = match read {
                Ok(Some(body)) => body,
                Ok(None) => break,
                Err(AppError::MalformedProtocol(reason)) => {
                    // the stream can't be resynchronized, answer once and hang up
                    debug!("connection {} sent an illegal frame: {}", self.connection_id, reason);
                    self.write_response(&Response::new(Status::IllegalPackage)).await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = self
                .processor
                .process_request(body, &self.connection.client_ip)
                .await;
            self.write_response(&response).await?;
        }
        debug!("connection {} closed by peer", self.connection_id);

        Ok(())
    }

    async fn write_response(&mut self, response: &Response) -> AppResult<()> {
        let frame = pack(&response.encode()?)?;
        self.writer
            .write_all(&frame)
            .await
            .map_err(|e| AppError::DetailedIoError(format!("write response error: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| AppError::DetailedIoError(format!("flush response error: {}", e)))?;
        Ok(())
    }
}

/// TCP front end of a serving node.
///
/// Accepts connections up to `max_connection` at a time and serves each on
/// its own task; requests on one connection are answered in order.
///
/// Shutdown: the owner stops polling `run` and broadcasts on
/// `notify_shutdown`. Handlers stop reading once they see the broadcast and
/// drop their `shutdown_complete_tx` clone; the owner waits on the matching
/// receiver until every handler is gone.
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    processor: Arc<RequestProcessor>,
    network: NetworkConfig,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        processor: Arc<RequestProcessor>,
        network: NetworkConfig,
    ) -> Self {
        Server {
            listener,
            limit_connections: Arc::new(Semaphore::new(network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            processor,
            network,
        }
    }

    /// Accepts connections until accepting fails for good.
    pub async fn run(&self) -> AppResult<()> {
        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limiter closed: {}", e)))?;

            let socket = self.accept().await?;
            socket.set_nodelay(true)?;

            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let (reader, writer) = socket.into_split();

            let mut handler = ConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                connection_id,
                connection: Connection::new(
                    reader,
                    self.network.conn_read_buffer_size,
                    self.network.max_package_size,
                ),
                writer: BufWriter::new(writer),
                processor: self.processor.clone(),
            };
            trace!("accept connection {} from {}", connection_id, handler.connection.client_ip);

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("Connection error: {:?}", err);
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIoError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                    error!("accept failed, retry in {}s: {}", backoff, err);
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        trace!("connection handler {} dropped", self.connection_id);
    }
}
