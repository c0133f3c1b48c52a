//! Core of the greeter server.
//!
//! This crate provides the per-connection building blocks:
//! - `Connection` - Text message channel shared by both activities
//! - `Session` - Runs Heartbeat and Echo with joint shutdown
//! - `SessionConfig` - Heartbeat cadence and marker
//! - `MemoryConnection` - In-process connection pair (feature: memory)

pub mod config;
pub mod connection;
pub mod message;
pub mod session;

#[cfg(feature = "memory")]
pub mod memory;

pub use config::{ConfigError, SessionConfig};
pub use connection::{Connection, ConnectionError};
pub use session::{Activity, Session, SessionError, SessionId, Termination};

#[cfg(feature = "memory")]
pub use memory::{MemoryConnection, MemoryPeer};
