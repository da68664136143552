//! Unix-socket transport layer for CSI messages.
//!
//! This module provides [`CsiClient`](client::CsiClient) and
//! [`CsiServer`](server::CsiServer), which exchange JSON-encoded
//! [`CsiMessage`](crate::CsiMessage) values over a local socket.  Every
//! connection carries one request and one response, each terminated by the
//! sender closing its write half.

pub mod client;
pub mod server;

/// Upper bound for a single encoded request or response.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
