//! Byte transport underneath a Horizons session
//!
//! The session driver only needs three primitives: read whatever is available
//! before a deadline, write bytes, and close. [`Transport`] is the seam that
//! lets the driver run over a real telnet connection ([`TcpTransport`]) or a
//! scripted stand-in in tests.

mod tcp;
pub(crate) mod telnet;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

pub use tcp::TcpTransport;

/// Outcome of a successful read
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// Bytes received (never empty)
    Data(Vec<u8>),
    /// The remote side closed the connection
    Eof,
}

/// Full-duplex byte stream to the remote service
///
/// Implementations must return [`TransportError::DeadlineElapsed`] when the
/// deadline passes without data, and [`TransportError::Closed`] as soon as the
/// transport is closed through a [`CloseHandle`], including while a read is
/// pending.
#[async_trait]
pub trait Transport: Send {
    /// Wait until some bytes are available or the deadline passes
    async fn read_available(&mut self, deadline: Instant) -> Result<Chunk, TransportError>;

    /// Write all bytes
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Release the connection; calling it twice is harmless
    async fn close(&mut self) -> Result<(), TransportError>;

    /// Handle that closes this transport from another task
    fn close_handle(&self) -> CloseHandle;
}

/// Cloneable handle that closes a transport and unblocks its pending read
#[derive(Debug, Clone, Default)]
pub struct CloseHandle {
    token: CancellationToken,
}

impl CloseHandle {
    /// Handle backed by an existing cancellation token
    pub fn from_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Close the transport
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Whether the transport has been closed
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the transport is closed
    pub async fn closed(&self) {
        self.token.cancelled().await;
    }
}

/// Send one line of input, terminated the way a telnet client would
pub async fn send_line<T: Transport + ?Sized>(
    transport: &mut T,
    line: &str,
) -> Result<(), TransportError> {
    let mut bytes = Vec::with_capacity(line.len() + 2);
    bytes.extend_from_slice(line.as_bytes());
    bytes.extend_from_slice(b"\r\n");
    transport.write(&bytes).await
}
