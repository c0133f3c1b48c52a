//! Connection abstraction consumed by sessions.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Connection error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Peer or transport closed the channel.
    #[error("Connection closed")]
    Closed,
    /// Any other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ConnectionError {
    /// Whether this error is a plain close rather than a failure.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Bidirectional, message-oriented text channel to one client.
///
/// Implementations must serialize concurrent `send` calls so that two
/// messages are never interleaved on the wire. `recv` is only ever called
/// by a single reader.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send one text message.
    async fn send(&self, text: &str) -> Result<(), ConnectionError>;

    /// Receive the next text message.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    async fn recv(&self) -> Result<Option<String>, ConnectionError>;
}

#[async_trait]
impl<C> Connection for Arc<C>
where
    C: Connection + ?Sized,
{
    async fn send(&self, text: &str) -> Result<(), ConnectionError> {
        (**self).send(text).await
    }

    async fn recv(&self) -> Result<Option<String>, ConnectionError> {
        (**self).recv().await
    }
}
