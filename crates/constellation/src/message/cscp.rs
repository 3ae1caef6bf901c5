// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP control messages: one verb, an optional payload.
//!
//! Frame layout: `[header][verb-type + verb][payload?]`. The verb frame is
//! a msgpack stream of a one-byte type and the verb string.

use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_str, decode_u8, infallible};
use crate::message::header::{MessageHeader, Protocol};
use crate::message::DecodeError;
use crate::transport::Multipart;

/// Type byte of a CSCP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CscpType {
    /// Request from a controller; the only type a satellite accepts.
    Request = 0x00,
    /// Command succeeded (or was accepted, for transitions).
    Success = 0x01,
    /// Command is known but not implemented by this satellite.
    NotImplemented = 0x02,
    /// Command payload missing or malformed.
    Incomplete = 0x03,
    /// Command not allowed in the current state.
    Invalid = 0x04,
    /// Command is not known at all.
    Unknown = 0x05,
    /// Request could not be processed.
    Error = 0x06,
}

impl CscpType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(CscpType::Request),
            0x01 => Some(CscpType::Success),
            0x02 => Some(CscpType::NotImplemented),
            0x03 => Some(CscpType::Incomplete),
            0x04 => Some(CscpType::Invalid),
            0x05 => Some(CscpType::Unknown),
            0x06 => Some(CscpType::Error),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CscpType::Request => "REQUEST",
            CscpType::Success => "SUCCESS",
            CscpType::NotImplemented => "NOTIMPLEMENTED",
            CscpType::Incomplete => "INCOMPLETE",
            CscpType::Invalid => "INVALID",
            CscpType::Unknown => "UNKNOWN",
            CscpType::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for CscpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A CSCP request or reply.
#[derive(Debug, Clone, PartialEq)]
pub struct CscpMessage {
    header: MessageHeader,
    verb_type: CscpType,
    verb: String,
    payload: Option<Vec<u8>>,
}

impl CscpMessage {
    pub fn new(header: MessageHeader, verb_type: CscpType, verb: impl Into<String>) -> Self {
        CscpMessage { header, verb_type, verb: verb.into(), payload: None }
    }

    /// Convenience constructor for controller-side requests.
    pub fn request(sender: impl Into<String>, verb: impl Into<String>) -> Self {
        CscpMessage::new(MessageHeader::new(sender), CscpType::Request, verb)
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut MessageHeader {
        &mut self.header
    }

    pub fn verb_type(&self) -> CscpType {
        self.verb_type
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Assemble into transport frames.
    pub fn assemble(&self) -> Multipart {
        let mut verb_frame = ByteBuf::new();
        infallible(encode::write_uint(&mut verb_frame, u64::from(self.verb_type as u8)));
        infallible(encode::write_str(&mut verb_frame, &self.verb));

        let mut frames = vec![self.header.assemble(Protocol::Cscp), verb_frame.into_vec()];
        if let Some(payload) = &self.payload {
            frames.push(payload.clone());
        }
        frames
    }

    /// Decode from transport frames.
    pub fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        if frames.len() < 2 || frames.len() > 3 {
            return Err(DecodeError::Malformed(format!(
                "CSCP message has {} frames, expected 2 or 3",
                frames.len()
            )));
        }
        let header = MessageHeader::disassemble(Protocol::Cscp, &frames[0])?;

        let mut verb_slice = frames[1].as_slice();
        let type_byte = decode_u8(&mut verb_slice)?;
        let verb_type =
            CscpType::from_byte(type_byte).ok_or(DecodeError::UnknownMessageType(type_byte))?;
        let verb = decode_str(&mut verb_slice)?;
        if !verb_slice.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes after verb".into()));
        }

        let payload = frames.get(2).cloned();
        Ok(CscpMessage { header, verb_type, verb, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let msg = CscpMessage::request("ctrl.main", "get_state");
        let decoded = CscpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.verb_type(), CscpType::Request);
        assert_eq!(decoded.verb(), "get_state");
        assert_eq!(decoded.header().sender(), "ctrl.main");
        assert!(!decoded.has_payload());
    }

    #[test]
    fn payload_roundtrip() {
        let msg = CscpMessage::new(MessageHeader::new("Dummy.s1"), CscpType::Success, "ORBIT")
            .with_payload(vec![0x30]);
        let decoded = CscpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.payload(), Some(&[0x30][..]));
    }

    #[test]
    fn frame_count_is_checked() {
        let msg = CscpMessage::request("c.c", "launch");
        let mut frames = msg.assemble();
        frames.push(vec![]);
        frames.push(vec![]);
        assert!(CscpMessage::disassemble(&frames).is_err());
        assert!(CscpMessage::disassemble(&vec![frames[0].clone()]).is_err());
    }

    #[test]
    fn unknown_verb_type_is_rejected() {
        let msg = CscpMessage::request("c.c", "launch");
        let mut frames = msg.assemble();
        // Patch the verb type to an undefined value
        let mut verb_frame = ByteBuf::new();
        infallible(encode::write_uint(&mut verb_frame, 0x4F));
        infallible(encode::write_str(&mut verb_frame, "launch"));
        frames[1] = verb_frame.into_vec();
        assert!(matches!(
            CscpMessage::disassemble(&frames),
            Err(DecodeError::UnknownMessageType(0x4F))
        ));
    }
}
