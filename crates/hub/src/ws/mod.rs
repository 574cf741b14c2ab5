//! WebSocket endpoint for the realtime hub
//!
//! Handles multiple concurrent connections with per-connection session
//! lifecycle and best-effort broadcast.
//!
//! ## Module Structure
//! - `connection`: upgrade handling, session lifecycle, message dispatch

mod connection;

pub use connection::ws_handler;
