//! In-memory connection pair.
//!
//! `MemoryConnection` is the server side handed to a `Session`;
//! `MemoryPeer` plays the client.

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::connection::{Connection, ConnectionError};

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryConnection {
    /// Create a connected pair.
    #[must_use]
    pub fn pair() -> (Self, MemoryPeer) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let conn = Self {
            outbound: outbound_tx,
            inbound: Mutex::new(inbound_rx),
        };

        let peer = MemoryPeer {
            tx: Some(inbound_tx),
            rx: outbound_rx,
        };

        (conn, peer)
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, text: &str) -> Result<(), ConnectionError> {
        self.outbound
            .send(text.to_owned())
            .map_err(|_| ConnectionError::Closed)
    }

    async fn recv(&self) -> Result<Option<String>, ConnectionError> {
        Ok(self.inbound.lock().await.recv().await)
    }
}

/// Client side of an in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Send a message to the server side.
    ///
    /// # Errors
    /// Returns error if the server side is gone or writing was closed.
    pub fn send(&self, text: impl Into<String>) -> Result<(), ConnectionError> {
        self.tx
            .as_ref()
            .ok_or(ConnectionError::Closed)?
            .send(text.into())
            .map_err(|_| ConnectionError::Closed)
    }

    /// Stop writing. The server side sees end of stream but can still send.
    pub fn close_write(&mut self) {
        self.tx = None;
    }

    /// Receive the next message from the server side.
    ///
    /// Returns `None` once the server side has been dropped.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}
