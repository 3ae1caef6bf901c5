// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDTP data messages bracketing and filling a run.
//!
//! Frame 0 carries the protocol tag, the sequence number and the message
//! type before the usual sender/timestamp/tags fields; frames 1..N are
//! opaque payload. Within a run the sequence numbers of one sender are
//! contiguous: BOR is 0, payloads are 1..N, EOR is N+1.

use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_u64, decode_u8, infallible};
use crate::config::Dictionary;
use crate::message::header::{decode_tag, encode_tag, MessageHeader, Protocol};
use crate::message::DecodeError;
use crate::protocol::cdtp::MessageType;
use crate::transport::Multipart;

/// Header of a CDTP message: the common fields plus run bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CdtpHeader {
    sequence: u64,
    msg_type: MessageType,
    inner: MessageHeader,
}

impl CdtpHeader {
    pub fn new(sender: impl Into<String>, sequence: u64, msg_type: MessageType) -> Self {
        CdtpHeader { sequence, msg_type, inner: MessageHeader::new(sender) }
    }

    pub fn with_tags(
        sender: impl Into<String>,
        sequence: u64,
        msg_type: MessageType,
        tags: Dictionary,
    ) -> Self {
        CdtpHeader { sequence, msg_type, inner: MessageHeader::with_tags(sender, tags) }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn message_type(&self) -> MessageType {
        self.msg_type
    }

    pub fn sender(&self) -> &str {
        self.inner.sender()
    }

    pub fn time(&self) -> std::time::SystemTime {
        self.inner.time()
    }

    pub fn tags(&self) -> &Dictionary {
        self.inner.tags()
    }

    pub fn tags_mut(&mut self) -> &mut Dictionary {
        self.inner.tags_mut()
    }

    fn assemble(&self) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        encode_tag(Protocol::Cdtp, &mut buf);
        infallible(encode::write_uint(&mut buf, self.sequence));
        infallible(encode::write_uint(&mut buf, u64::from(self.msg_type as u8)));
        self.inner.encode_rest(&mut buf);
        buf.into_vec()
    }

    fn disassemble(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = frame;
        decode_tag(Protocol::Cdtp, &mut slice)?;
        let sequence = decode_u64(&mut slice)?;
        let type_byte = decode_u8(&mut slice)?;
        let msg_type =
            MessageType::from_byte(type_byte).ok_or(DecodeError::UnknownMessageType(type_byte))?;
        let inner = MessageHeader::decode_rest(&mut slice)?;
        if !slice.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes after CDTP header".into()));
        }
        Ok(CdtpHeader { sequence, msg_type, inner })
    }
}

/// A CDTP message: header plus payload frames.
#[derive(Debug, Clone, PartialEq)]
pub struct CdtpMessage {
    header: CdtpHeader,
    payload: Vec<Vec<u8>>,
}

impl CdtpMessage {
    pub fn new(header: CdtpHeader) -> Self {
        CdtpMessage { header, payload: Vec::new() }
    }

    /// Reserve space for a known payload frame count.
    pub fn with_frames(header: CdtpHeader, frames: usize) -> Self {
        CdtpMessage { header, payload: Vec::with_capacity(frames) }
    }

    pub fn header(&self) -> &CdtpHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut CdtpHeader {
        &mut self.header
    }

    pub fn add_payload(&mut self, frame: Vec<u8>) {
        self.payload.push(frame);
    }

    pub fn payload(&self) -> &[Vec<u8>] {
        &self.payload
    }

    /// Assemble into transport frames.
    pub fn assemble(&self) -> Multipart {
        let mut frames = Vec::with_capacity(1 + self.payload.len());
        frames.push(self.header.assemble());
        frames.extend(self.payload.iter().cloned());
        frames
    }

    /// Decode from transport frames.
    pub fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        let Some((header_frame, payload)) = frames.split_first() else {
            return Err(DecodeError::MissingFrame("header"));
        };
        let header = CdtpHeader::disassemble(header_frame)?;
        Ok(CdtpMessage { header, payload: payload.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Value;

    #[test]
    fn data_message_roundtrip() {
        let mut msg = CdtpMessage::with_frames(
            CdtpHeader::new("Dummy.t1", 17, MessageType::Data),
            2,
        );
        msg.add_payload(vec![1, 2, 3]);
        msg.add_payload(vec![4, 5]);

        let decoded = CdtpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.header().sequence(), 17);
        assert_eq!(decoded.header().message_type(), MessageType::Data);
        assert_eq!(decoded.header().sender(), "Dummy.t1");
        assert_eq!(decoded.payload().len(), 2);
        assert_eq!(decoded.payload()[0], vec![1, 2, 3]);
    }

    #[test]
    fn bor_carries_tags() {
        let mut tags = Dictionary::new();
        tags.insert("run_id", "test");
        let header = CdtpHeader::with_tags("Dummy.t1", 0, MessageType::Bor, tags);
        let mut msg = CdtpMessage::new(header);
        msg.add_payload(Dictionary::new().assemble());

        let decoded = CdtpMessage::disassemble(&msg.assemble()).expect("decode");
        assert_eq!(decoded.header().message_type(), MessageType::Bor);
        assert_eq!(decoded.header().tags().get("run_id"), Some(&Value::Str("test".into())));
    }

    #[test]
    fn missing_header_frame_is_rejected() {
        assert!(matches!(
            CdtpMessage::disassemble(&Vec::new()),
            Err(DecodeError::MissingFrame(_))
        ));
    }

    #[test]
    fn unknown_type_byte_is_rejected() {
        let msg = CdtpMessage::new(CdtpHeader::new("a.b", 0, MessageType::Bor));
        let mut frames = msg.assemble();
        // Rebuild the header with a bogus type byte
        let mut buf = ByteBuf::new();
        encode_tag(Protocol::Cdtp, &mut buf);
        infallible(encode::write_uint(&mut buf, 0));
        infallible(encode::write_uint(&mut buf, 9));
        MessageHeader::new("a.b").encode_rest(&mut buf);
        frames[0] = buf.into_vec();
        assert!(matches!(
            CdtpMessage::disassemble(&frames),
            Err(DecodeError::UnknownMessageType(9))
        ));
    }
}
