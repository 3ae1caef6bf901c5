// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire framing for all Constellation protocol units.
//!
//! Every message type in this module follows the same contract: an
//! `assemble()` method producing the exact byte layout for the wire and a
//! `disassemble()` constructor that validates and rejects with a
//! [`DecodeError`]. Callers on receive paths log decode failures and keep
//! listening; a decode failure never tears down a socket.

pub mod cdtp;
pub mod chirp;
pub mod chp;
pub mod cmdp;
pub mod cscp;
pub mod header;
pub mod md5;

pub use cdtp::CdtpMessage;
pub use chirp::{ChirpMessage, ChirpMessageType};
pub use chp::ChpMessage;
pub use cmdp::CmdpMessage;
pub use cscp::{CscpMessage, CscpType};
pub use header::MessageHeader;
pub use md5::Md5Hash;

/// Failure to decode a received protocol unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Datagram or frame length does not match the protocol layout.
    WrongLength { expected: usize, received: usize },
    /// The CHIRP magic bytes are missing.
    NotChirp,
    /// Unsupported protocol version byte.
    UnknownVersion(u8),
    /// Unknown message type byte.
    UnknownMessageType(u8),
    /// Unknown service identifier byte.
    UnknownService(u8),
    /// The header names a different (known) protocol than the caller expects.
    UnexpectedProtocol { received: String, expected: &'static str },
    /// The header protocol tag is not a Constellation protocol at all.
    InvalidProtocol(String),
    /// A required frame is missing from the multipart unit.
    MissingFrame(&'static str),
    /// Any other structural problem in the encoded bytes.
    Malformed(String),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::WrongLength { expected, received } => {
                write!(f, "Message length {received} does not match expected {expected}")
            }
            DecodeError::NotChirp => write!(f, "Message does not start with CHIRP magic bytes"),
            DecodeError::UnknownVersion(v) => write!(f, "Unknown protocol version {v:#04x}"),
            DecodeError::UnknownMessageType(t) => write!(f, "Unknown message type {t:#04x}"),
            DecodeError::UnknownService(s) => write!(f, "Unknown service identifier {s:#04x}"),
            DecodeError::UnexpectedProtocol { received, expected } => {
                write!(f, "Received message of protocol {received:?}, expected {expected:?}")
            }
            DecodeError::InvalidProtocol(p) => write!(f, "Invalid protocol identifier {p:?}"),
            DecodeError::MissingFrame(which) => write!(f, "Message is missing its {which} frame"),
            DecodeError::Malformed(what) => write!(f, "Malformed message: {what}"),
        }
    }
}

impl std::error::Error for DecodeError {}
