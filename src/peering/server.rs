//! Peering TCP server.
//!
//! Accepts peer connections, decodes request frames and dispatches each to
//! the [`MessageHandler`], answering with one ack per request. A connection
//! may carry any number of requests. Shutdown is signalled through a watch
//! channel shared with the runtime.

use crate::core::error::{FredError, FredResult};
use crate::peering::message::{Ack, DecodeResult, Frame, FrameCodec};
use crate::peering::MessageHandler;
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

/// Server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Not yet started.
    Created,
    /// Accepting connections.
    Listening,
    /// Stopped.
    Stopped,
}

/// Connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer-conn-{}", self.0)
    }
}

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    /// Connections accepted.
    pub connections_total: AtomicU64,
    /// Currently open connections.
    pub connections_active: AtomicU64,
    /// Requests handled successfully.
    pub requests_ok: AtomicU64,
    /// Requests answered with a failure ack.
    pub requests_failed: AtomicU64,
}

impl ServerMetrics {
    /// Currently open connections.
    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}

/// Peering listener.
pub struct PeeringServer {
    bind_addr: SocketAddr,
    codec: FrameCodec,
    handler: Arc<dyn MessageHandler>,
    shutdown_rx: watch::Receiver<bool>,
    state: RwLock<ServerState>,
    local_addr: RwLock<Option<SocketAddr>>,
    next_conn_id: AtomicU64,
    metrics: Arc<ServerMetrics>,
}

impl PeeringServer {
    /// Create a server. Nothing is bound until [`bind`](Self::bind).
    pub fn new(
        bind_addr: SocketAddr,
        max_frame_bytes: usize,
        handler: Arc<dyn MessageHandler>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            codec: FrameCodec::new(max_frame_bytes),
            handler,
            shutdown_rx,
            state: RwLock::new(ServerState::Created),
            local_addr: RwLock::new(None),
            next_conn_id: AtomicU64::new(1),
            metrics: Arc::new(ServerMetrics::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        *self.state.read()
    }

    /// Bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Get metrics.
    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Bind the listener.
    pub async fn bind(&self) -> FredResult<TcpListener> {
        let listener = TcpListener::bind(self.bind_addr).await.map_err(|e| {
            FredError::internal(format!("failed to bind to {}: {}", self.bind_addr, e))
        })?;

        let local = listener
            .local_addr()
            .map_err(|e| FredError::internal(format!("no local address: {}", e)))?;
        *self.local_addr.write() = Some(local);
        *self.state.write() = ServerState::Listening;

        tracing::info!(bind = %local, "peering server listening");
        Ok(listener)
    }

    /// Accept connections until shutdown.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> FredResult<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                tracing::debug!(
                                    remote = %remote,
                                    error = %e,
                                    "failed to set TCP_NODELAY"
                                );
                            }
                            let id = ConnectionId(self.next_conn_id.fetch_add(1, Ordering::Relaxed));
                            self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream).await {
                                    tracing::debug!(conn = %id, remote = %remote, error = %e, "peer connection closed with error");
                                }
                                server.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "peering accept failed");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        }

        *self.state.write() = ServerState::Stopped;
        tracing::info!("peering server stopped");
        Ok(())
    }

    /// Bind and serve.
    pub async fn run(self: Arc<Self>) -> FredResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> FredResult<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut buf = bytes::BytesMut::with_capacity(4096);

        loop {
            loop {
                let reply = match self.codec.decode(&mut buf) {
                    DecodeResult::Incomplete => break,
                    DecodeResult::Complete(Frame::Request(message)) => {
                        let kind = message.message_type();
                        let result = self.handler.handle(message).await;
                        match &result {
                            Ok(()) => {
                                self.metrics.requests_ok.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(message = %kind, error = %e, "request failed");
                            }
                        }
                        Ack::from_result(&result)
                    }
                    DecodeResult::Complete(Frame::Ack(_)) => {
                        let err = FredError::decode("unexpected ack frame");
                        self.write_ack(&mut stream, &Ack::failure(&err)).await?;
                        return Err(err);
                    }
                    DecodeResult::Invalid(reason) => {
                        let err = FredError::decode(reason);
                        self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
                        self.write_ack(&mut stream, &Ack::failure(&err)).await?;
                        return Err(err);
                    }
                };
                self.write_ack(&mut stream, &reply).await?;
            }

            tokio::select! {
                read = stream.read_buf(&mut buf) => {
                    let n = read.map_err(|e| FredError::internal(format!("read failed: {}", e)))?;
                    if n == 0 {
                        return Ok(());
                    }
                }
                _ = shutdown_rx.changed() => return Ok(()),
            }
        }
    }

    async fn write_ack(&self, stream: &mut TcpStream, ack: &Ack) -> FredResult<()> {
        let bytes = self.codec.encode(&Frame::Ack(ack.clone())).into_result()?;
        stream
            .write_all(&bytes)
            .await
            .map_err(|e| FredError::internal(format!("write failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peering::message::PeerMessage;
    use crate::peering::{PeeringClient, TcpPeeringClient};
    use crate::replication::keygroup::KeygroupName;
    use crate::replication::node::Address;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<PeerMessage>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, message: PeerMessage) -> FredResult<()> {
            if let PeerMessage::DeleteKeygroup(body) = &message {
                if body.keygroup.as_str() == "missing" {
                    return Err(FredError::not_found("keygroup missing not found"));
                }
            }
            self.seen.lock().push(message);
            Ok(())
        }
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "peer-conn-7");
    }

    #[tokio::test]
    async fn test_client_server_exchange() {
        let (tx, rx) = watch::channel(false);
        let recorder = Arc::new(Recorder::default());
        let server = Arc::new(PeeringServer::new(
            "127.0.0.1:0".parse().unwrap(),
            64 * 1024,
            recorder.clone(),
            rx,
        ));

        let listener = server.bind().await.unwrap();
        let port = server.local_addr().unwrap().port();
        let handle = tokio::spawn(Arc::clone(&server).serve(listener));

        let client = TcpPeeringClient::new(64 * 1024, Duration::from_secs(1), Duration::from_secs(1));
        let addr = Address::parse("127.0.0.1").unwrap();

        client
            .send_delete_keygroup(&addr, port, &KeygroupName::new("kg1").unwrap())
            .await
            .unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);

        let err = client
            .send_delete_keygroup(&addr, port, &KeygroupName::new("missing").unwrap())
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("404"));

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.metrics().requests_ok.load(Ordering::Relaxed), 1);
    }
}
