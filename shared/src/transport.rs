//! Outbound side of one ordered, message-oriented connection.
//!
//! Runtimes own the socket and drain the receiver half; the agents only ever
//! hold a [`ConnectionHandle`]. Sending never blocks, and a closed receiver
//! surfaces as [`SendError::Closed`] instead of a panic.

use crate::protocol::{encode, Message, ProtocolError};
use thiserror::Error;
use tokio::sync::mpsc;

pub type ConnectionId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, sender: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, sender }
    }

    /// Creates a handle together with the receiver a writer task drains.
    pub fn channel(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(id, sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, message: &Message) -> Result<(), SendError> {
        let text = encode(message)?;
        self.send_text(text)
    }

    /// Sends an already encoded frame, used when broadcasting one payload.
    pub fn send_text(&self, text: String) -> Result<(), SendError> {
        self.sender
            .send(Outbound::Text(text))
            .map_err(|_| SendError::Closed)
    }

    /// Asks the writer to close the socket. Later sends fail.
    pub fn close(&self) {
        let _ = self.sender.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode;

    #[test]
    fn test_send_encodes_message() {
        let (handle, mut receiver) = ConnectionHandle::channel(7);
        assert_eq!(handle.id(), 7);

        handle.send(&Message::ping(3)).unwrap();

        match receiver.try_recv().unwrap() {
            Outbound::Text(text) => assert_eq!(decode(&text).unwrap(), Message::ping(3)),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_send_after_receiver_dropped_fails() {
        let (handle, receiver) = ConnectionHandle::channel(1);
        drop(receiver);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.send(&Message::pong(1)),
            Err(SendError::Closed)
        ));
        // Closing an already closed handle is harmless.
        handle.close();
    }

    #[test]
    fn test_close_is_queued_after_pending_frames() {
        let (handle, mut receiver) = ConnectionHandle::channel(1);
        handle.send(&Message::ping(1)).unwrap();
        handle.close();

        assert!(matches!(receiver.try_recv(), Ok(Outbound::Text(_))));
        assert_eq!(receiver.try_recv().unwrap(), Outbound::Close);
    }
}
