//! Port Interfaces
//!
//! Contracts the infrastructure adapters implement so the client loop can
//! run over a real websocket or an in-memory channel.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`Transport`]: ordered, text-framed, bidirectional message stream

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connection is gone.
    #[error("transport disconnected")]
    Disconnected,

    /// Writing a frame failed.
    #[error("send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("receive failed: {0}")]
    Receive(String),
}

/// A text-framed message transport.
///
/// Each inbound item is one frame: a JSON array of messages (or a single
/// object). Frames are delivered in order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Write one text frame.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Read the next text frame; `None` once the peer closed the stream.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection. Calling it twice is harmless.
    async fn close(&mut self) -> Result<(), TransportError>;
}
