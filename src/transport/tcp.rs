//! Telnet-over-TCP transport

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::telnet::{self, TelnetCodec};
use super::{Chunk, CloseHandle, Transport};
use crate::config::ServerConfig;
use crate::error::TransportError;

const READ_BUFFER_SIZE: usize = 16 * 1024;

/// TCP connection to a telnet service
///
/// Telnet negotiation is answered transparently; reads return application
/// data only.
pub struct TcpTransport {
    stream: TcpStream,
    peer: String,
    codec: TelnetCodec,
    closed: CancellationToken,
    read_buf: Box<[u8]>,
}

impl TcpTransport {
    /// Connect to the configured server
    ///
    /// `cancel` closes the transport when cancelled; pass a child of a
    /// retriever-wide token to cancel in-flight sessions together.
    pub async fn connect(
        server: &ServerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", server.host, server.port);
        tracing::debug!(addr = %addr, "Connecting");

        let connect = tokio::time::timeout(server.connect_timeout, TcpStream::connect(addr.clone()));
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Closed),
            result = connect => match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
                Err(_) => {
                    return Err(TransportError::Connect {
                        addr,
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "connection attempt timed out",
                        ),
                    });
                }
            },
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Could not disable Nagle's algorithm");
        }
        tracing::info!(addr = %addr, "Connected");

        Ok(Self {
            stream,
            peer: addr,
            codec: TelnetCodec::new(),
            closed: cancel,
            read_buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        })
    }

    /// Address this transport is connected to
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read_available(&mut self, deadline: Instant) -> Result<Chunk, TransportError> {
        loop {
            if self.closed.is_cancelled() {
                return Err(TransportError::Closed);
            }

            let read = tokio::time::timeout_at(deadline, self.stream.read(&mut self.read_buf));
            let n = tokio::select! {
                biased;
                _ = self.closed.cancelled() => return Err(TransportError::Closed),
                result = read => match result {
                    Err(_) => return Err(TransportError::DeadlineElapsed),
                    Ok(Err(e)) => return Err(TransportError::Broken(e)),
                    Ok(Ok(n)) => n,
                },
            };

            if n == 0 {
                tracing::debug!(peer = %self.peer, "Remote closed the connection");
                return Ok(Chunk::Eof);
            }

            let decoded = self.codec.decode(&self.read_buf[..n]);
            if !decoded.replies.is_empty() {
                tracing::trace!(bytes = decoded.replies.len(), "Refusing telnet options");
                self.stream
                    .write_all(&decoded.replies)
                    .await
                    .map_err(TransportError::Broken)?;
            }

            // A read holding only negotiation carries no data; keep waiting
            if !decoded.data.is_empty() {
                return Ok(Chunk::Data(decoded.data));
            }
        }
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let escaped = telnet::escape(bytes);
        self.stream
            .write_all(&escaped)
            .await
            .map_err(TransportError::Broken)?;
        self.stream.flush().await.map_err(TransportError::Broken)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed.cancel();
        if let Err(e) = self.stream.shutdown().await {
            // Already shut down or reset by the peer
            tracing::debug!(peer = %self.peer, error = %e, "Shutdown after close");
        }
        Ok(())
    }

    fn close_handle(&self) -> CloseHandle {
        CloseHandle::from_token(self.closed.clone())
    }
}
