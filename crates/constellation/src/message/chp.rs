// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHP heartbeat messages.
//!
//! Frame layout: `[header][body]` where the body is a msgpack stream of the
//! remote state byte, the declared interval in milliseconds, an optional
//! status string and a flag byte.

use std::time::Duration;

use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_u64, decode_u8, infallible};
use crate::message::header::{MessageHeader, Protocol};
use crate::message::DecodeError;
use crate::protocol::State;
use crate::transport::Multipart;

/// Flag: this beacon was sent out-of-band on a state change.
pub const FLAG_EXTRASYSTOLE: u8 = 0x01;

/// A heartbeat beacon.
#[derive(Debug, Clone, PartialEq)]
pub struct ChpMessage {
    header: MessageHeader,
    state: State,
    interval: Duration,
    status: Option<String>,
    flags: u8,
}

impl ChpMessage {
    pub fn new(sender: impl Into<String>, state: State, interval: Duration) -> Self {
        ChpMessage { header: MessageHeader::new(sender), state, interval, status: None, flags: 0 }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Interval at which the sender promises to beat.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_extrasystole(&self) -> bool {
        self.flags & FLAG_EXTRASYSTOLE != 0
    }

    /// Assemble into transport frames.
    pub fn assemble(&self) -> Multipart {
        let mut body = ByteBuf::new();
        infallible(encode::write_uint(&mut body, u64::from(self.state as u8)));
        infallible(encode::write_uint(&mut body, self.interval.as_millis() as u64));
        match &self.status {
            Some(status) => infallible(encode::write_str(&mut body, status)),
            None => match encode::write_nil(&mut body) {
                Ok(()) => (),
                Err(e) => match e {},
            },
        }
        infallible(encode::write_uint(&mut body, u64::from(self.flags)));

        vec![self.header.assemble(Protocol::Chp), body.into_vec()]
    }

    /// Decode from transport frames.
    pub fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        if frames.len() != 2 {
            return Err(DecodeError::Malformed(format!(
                "CHP message has {} frames, expected 2",
                frames.len()
            )));
        }
        let header = MessageHeader::disassemble(Protocol::Chp, &frames[0])?;

        let mut body = frames[1].as_slice();
        let state_byte = decode_u8(&mut body)?;
        let state =
            State::from_byte(state_byte).ok_or(DecodeError::UnknownMessageType(state_byte))?;
        let interval = Duration::from_millis(decode_u64(&mut body)?);
        let status = match body.first() {
            Some(0xC0) => {
                body = &body[1..];
                None
            }
            _ => Some(crate::config::value::decode_str(&mut body)?),
        };
        let flags = decode_u8(&mut body)?;
        if !body.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes after heartbeat body".into()));
        }
        Ok(ChpMessage { header, state, interval, status, flags })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_roundtrip() {
        let msg = ChpMessage::new("Dummy.s1", State::Orbit, Duration::from_secs(1));
        let decoded = ChpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.state(), State::Orbit);
        assert_eq!(decoded.interval(), Duration::from_secs(1));
        assert_eq!(decoded.status(), None);
        assert!(!decoded.is_extrasystole());
    }

    #[test]
    fn status_and_flags_roundtrip() {
        let msg = ChpMessage::new("Dummy.s1", State::Error, Duration::from_millis(500))
            .with_status("hook raised")
            .with_flags(FLAG_EXTRASYSTOLE);
        let decoded = ChpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.state(), State::Error);
        assert_eq!(decoded.status(), Some("hook raised"));
        assert!(decoded.is_extrasystole());
    }

    #[test]
    fn unknown_state_byte_is_rejected() {
        let msg = ChpMessage::new("Dummy.s1", State::New, Duration::from_secs(1));
        let mut frames = msg.assemble();
        let mut body = ByteBuf::new();
        infallible(encode::write_uint(&mut body, 0x77));
        infallible(encode::write_uint(&mut body, 1000));
        match encode::write_nil(&mut body) {
            Ok(()) => (),
            Err(e) => match e {},
        }
        infallible(encode::write_uint(&mut body, 0));
        frames[1] = body.into_vec();
        assert!(ChpMessage::disassemble(&frames).is_err());
    }
}
