//! Duplex transport abstraction.
//!
//! The client only needs to push frames and ask whether the connection is
//! open. Open/message/close/error notifications are delivered by the host
//! calling the matching `Client::handle_*` method.

/// Outbound side of a duplex connection.
pub trait Transport {
    /// Queue a frame for sending.
    ///
    /// # Errors
    ///
    /// Returns error if the frame could not be handed to the connection.
    fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Whether the connection is currently open.
    fn is_open(&self) -> bool;
}

/// In-memory transport that records every frame sent through it.
///
/// Useful for embedding the client without a network and for tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryTransport {
    open: bool,
    sent: Vec<Vec<u8>>,
}

impl MemoryTransport {
    /// Create a closed transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an open transport.
    #[must_use]
    pub fn open() -> Self {
        Self {
            open: true,
            sent: Vec::new(),
        }
    }

    /// Mark the connection open or closed.
    pub fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    /// Frames sent so far.
    #[must_use]
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Drain the frames sent so far.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        self.sent.push(frame);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Errors raised by transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection is not open
    #[error("transport is not open")]
    Closed,
    /// The frame could not be handed off
    #[error("send failed: {0}")]
    Send(String),
}
