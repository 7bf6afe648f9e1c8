//! Transport traits
//!
//! The SSH layer only needs an ordered, reliable byte stream. Any
//! [`DuplexTransport`] can carry a session: the WebSocket tunnel in
//! production, a TCP socket for direct connections, or an in-memory pipe
//! in tests.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TunnelError;

/// Closes a transport after the stream itself has been moved into a
/// protocol client
#[async_trait]
pub trait TransportCloser: Send + Sync {
    /// Close the underlying transport. Must not hang.
    async fn close(&self) -> Result<(), TunnelError>;
}

/// A byte stream that can hand out a close handle for itself
pub trait DuplexTransport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Handle that closes this transport once the stream has been handed off
    fn closer(&self) -> Box<dyn TransportCloser>;
}

/// Closer for transports that are torn down by being dropped
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedCloser;

#[async_trait]
impl TransportCloser for DetachedCloser {
    async fn close(&self) -> Result<(), TunnelError> {
        Ok(())
    }
}

impl DuplexTransport for tokio::net::TcpStream {
    fn closer(&self) -> Box<dyn TransportCloser> {
        Box::new(DetachedCloser)
    }
}

impl DuplexTransport for tokio::io::DuplexStream {
    fn closer(&self) -> Box<dyn TransportCloser> {
        Box::new(DetachedCloser)
    }
}
