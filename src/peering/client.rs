//! TCP peering client.
//!
//! Opens one connection per request, writes the request frame and waits
//! for the acknowledgement. Connect and request phases are bounded by
//! separate timeouts.

use crate::core::error::{FredError, FredResult};
use crate::peering::message::{DecodeResult, Frame, FrameCodec, PeerMessage};
use crate::peering::PeeringClient;
use crate::replication::node::Address;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Client-side counters.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Requests acknowledged successfully.
    pub requests_ok: AtomicU64,
    /// Requests that failed (connect, timeout, rejected).
    pub requests_failed: AtomicU64,
}

/// Peering client over plain TCP.
#[derive(Debug)]
pub struct TcpPeeringClient {
    codec: FrameCodec,
    connect_timeout: Duration,
    request_timeout: Duration,
    metrics: ClientMetrics,
}

impl TcpPeeringClient {
    /// Create a client.
    pub fn new(max_frame_bytes: usize, connect_timeout: Duration, request_timeout: Duration) -> Self {
        Self {
            codec: FrameCodec::new(max_frame_bytes),
            connect_timeout,
            request_timeout,
            metrics: ClientMetrics::default(),
        }
    }

    /// Get metrics.
    pub fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    async fn exchange(&self, endpoint: &str, frame: Bytes) -> FredResult<()> {
        let mut stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(endpoint))
            .await
            .map_err(|_| FredError::transport(endpoint, "connect timed out"))?
            .map_err(|e| FredError::transport(endpoint, format!("connect failed: {}", e)))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(endpoint = %endpoint, error = %e, "failed to set TCP_NODELAY");
        }

        stream
            .write_all(&frame)
            .await
            .map_err(|e| FredError::transport(endpoint, format!("write failed: {}", e)))?;

        let mut buf = BytesMut::with_capacity(256);
        loop {
            match self.codec.decode(&mut buf) {
                DecodeResult::Complete(Frame::Ack(ack)) => return ack.into_result(endpoint),
                DecodeResult::Complete(other) => {
                    return Err(FredError::transport(
                        endpoint,
                        format!("expected ack, got {}", other.message_type()),
                    ))
                }
                DecodeResult::Invalid(reason) => {
                    return Err(FredError::transport(endpoint, format!("bad ack: {}", reason)))
                }
                DecodeResult::Incomplete => {}
            }

            let n = stream
                .read_buf(&mut buf)
                .await
                .map_err(|e| FredError::transport(endpoint, format!("read failed: {}", e)))?;
            if n == 0 {
                return Err(FredError::transport(endpoint, "connection closed before ack"));
            }
        }
    }
}

#[async_trait]
impl PeeringClient for TcpPeeringClient {
    async fn send(&self, address: &Address, port: u16, message: PeerMessage) -> FredResult<()> {
        let endpoint = address.with_port(port);
        let kind = message.message_type();
        let frame = self.codec.encode(&Frame::Request(message)).into_result()?;

        let result = match tokio::time::timeout(
            self.connect_timeout + self.request_timeout,
            self.exchange(&endpoint, frame),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FredError::transport(&endpoint, "request timed out")),
        };

        match &result {
            Ok(()) => {
                self.metrics.requests_ok.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(peer = %endpoint, message = %kind, "peer acknowledged");
            }
            Err(e) => {
                self.metrics.requests_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(peer = %endpoint, message = %kind, error = %e, "peer send failed");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::keygroup::KeygroupName;

    #[tokio::test]
    async fn test_unreachable_peer_is_transport_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = TcpPeeringClient::new(
            64 * 1024,
            Duration::from_millis(500),
            Duration::from_millis(500),
        );
        let address = Address::parse("127.0.0.1").unwrap();
        let err = client
            .send_delete_keygroup(&address, port, &KeygroupName::new("kg1").unwrap())
            .await
            .unwrap_err();

        assert!(err.is_transport());
        assert_eq!(client.metrics().requests_failed.load(Ordering::Relaxed), 1);
    }
}
