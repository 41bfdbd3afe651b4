//! Channel-backed transport.
//!
//! The client is synchronous; frames it sends are pushed onto an unbounded
//! channel drained by the socket writer in the runtime loop.

use simstate_client::{Transport, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport that forwards frames to the WebSocket writer.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    open: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Create a closed transport and the receiver for its frames.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            tx,
            open: Arc::new(AtomicBool::new(false)),
        };
        (transport, rx)
    }

    /// Mark the socket open or closed.
    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, frame: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        self.tx
            .send(frame)
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_reach_the_receiver_only_when_open() {
        let (mut transport, mut rx) = ChannelTransport::new();
        assert_eq!(transport.send(vec![1]), Err(TransportError::Closed));

        transport.set_open(true);
        transport.send(vec![2, 3]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![2, 3]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_a_send_error() {
        let (mut transport, rx) = ChannelTransport::new();
        transport.set_open(true);
        drop(rx);
        assert!(matches!(
            transport.send(vec![1]),
            Err(TransportError::Send(_))
        ));
    }
}
