//! Transport layer for greeter sessions.
//!
//! Provides:
//! - `WsConnection` - axum WebSocket adapted to `greeter_core::Connection`
//! - Upgrade handler and router running one session per socket
//!   (feature: websocket)

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::{WsConnection, WsState, create_ws_router, ws_handler};
