//! Plain-text message formats.

/// Default heartbeat marker.
pub const HEARTBEAT_MESSAGE: &str = "P";

/// Build the echo reply for a received message.
///
/// The received text is copied verbatim, whitespace included.
#[must_use]
pub fn greeting(received: &str) -> String {
    format!("Hello {received}!")
}
