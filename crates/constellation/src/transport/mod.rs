// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream transport the framed protocols ride on.
//!
//! TCP is a stream protocol without message boundaries, so every protocol
//! unit is length-prefix framed (see [`frame`]). On top of the framing this
//! module offers the four socket patterns the runtime needs:
//!
//! | Pattern | Server side | Client side | Used by |
//! |---------|-------------|-------------|---------|
//! | req/rep | [`RepSocket`] | [`ReqSocket`] | CSCP |
//! | pub/sub | [`PubSocket`] | [`SubSocket`] | CMDP, CHP |
//! | push/pull | [`PushSocket`] | [`PullSocket`] | CDTP |
//!
//! All server sockets bind an ephemeral port on the wildcard address and
//! multiplex their connections over one `mio::Poll` owned by the socket.
//! Client sockets are non-blocking `mio` streams registered into a pool's
//! poll ([`crate::pools`]), except [`ReqSocket`] which is a plain blocking
//! stream for controllers and tools.

pub mod frame;
pub mod pubsub;
pub mod pushpull;
pub mod rep;
pub mod req;
pub mod stream;

pub use frame::{FrameDecoder, Multipart};
pub use pubsub::{PubSocket, SubSocket, SubscriptionEvent};
pub use pushpull::{PullSocket, PushSocket};
pub use rep::RepSocket;
pub use req::ReqSocket;

use std::time::Duration;

/// Poll timeout used by server socket maintenance so stop requests are
/// honored within one wake interval.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Transport-level failure.
#[derive(Debug)]
pub enum NetworkError {
    /// Underlying socket operation failed.
    Io(std::io::Error),
    /// The peer closed the connection.
    Closed,
    /// No peer is connected to receive the message.
    NotConnected,
    /// A frame or unit exceeds the configured maximum size.
    TooLarge { size: usize, max: usize },
    /// The byte stream violates the framing layout.
    Framing(String),
    /// The operation did not complete within its deadline.
    Timeout,
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkError::Io(e) => write!(f, "Socket error: {e}"),
            NetworkError::Closed => write!(f, "Connection closed by peer"),
            NetworkError::NotConnected => write!(f, "No connected peer"),
            NetworkError::TooLarge { size, max } => {
                write!(f, "Message of {size} bytes exceeds limit of {max} bytes")
            }
            NetworkError::Framing(what) => write!(f, "Invalid frame layout: {what}"),
            NetworkError::Timeout => write!(f, "Operation timed out"),
        }
    }
}

impl std::error::Error for NetworkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            NetworkError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NetworkError {
    fn from(e: std::io::Error) -> Self {
        NetworkError::Io(e)
    }
}
