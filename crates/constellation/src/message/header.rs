// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The protocol header shared by all framed messages.
//!
//! Frame 0 of every framed protocol unit is a msgpack stream starting with
//! the protocol tag (four ASCII letters plus a version byte, e.g.
//! `"CSCP\x01"`), followed by the sender's canonical name, a nanosecond
//! timestamp and a tag dictionary. CDTP splices its sequence number and
//! message type between the tag and the sender (see
//! [`crate::message::cdtp`]).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_str, decode_u64, infallible};
use crate::config::Dictionary;
use crate::message::DecodeError;
use crate::protocol::PROTOCOL_VERSION;

/// The four framed protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Cscp,
    Cmdp,
    Chp,
    Cdtp,
}

impl Protocol {
    pub fn tag(&self) -> &'static str {
        match self {
            Protocol::Cscp => "CSCP",
            Protocol::Cmdp => "CMDP",
            Protocol::Chp => "CHP",
            Protocol::Cdtp => "CDTP",
        }
    }

    /// Tag with the version byte appended, as it travels on the wire.
    pub fn wire_tag(&self) -> String {
        let mut tag = self.tag().to_owned();
        tag.push(PROTOCOL_VERSION as char);
        tag
    }

    fn from_wire_tag(tag: &str) -> Option<Protocol> {
        let (name, _version) = tag.split_at_checked(tag.len().saturating_sub(1))?;
        match name {
            "CSCP" => Some(Protocol::Cscp),
            "CMDP" => Some(Protocol::Cmdp),
            "CHP" => Some(Protocol::Chp),
            "CDTP" => Some(Protocol::Cdtp),
            _ => None,
        }
    }
}

/// Write the protocol tag at the head of a header frame.
pub(crate) fn encode_tag(protocol: Protocol, buf: &mut ByteBuf) {
    infallible(encode::write_str(buf, &protocol.wire_tag()));
}

/// Read and validate the protocol tag of a header frame.
///
/// A tag naming another known protocol raises
/// [`DecodeError::UnexpectedProtocol`] so callers can tell a mis-routed
/// message from garbage; an unknown tag or version raises the matching
/// dedicated error.
pub(crate) fn decode_tag(protocol: Protocol, buf: &mut &[u8]) -> Result<(), DecodeError> {
    let tag = decode_str(buf)?;
    if tag == protocol.wire_tag() {
        return Ok(());
    }
    match Protocol::from_wire_tag(&tag) {
        Some(other) if other != protocol => Err(DecodeError::UnexpectedProtocol {
            received: other.tag().to_owned(),
            expected: protocol.tag(),
        }),
        Some(_) => {
            // Same protocol, different version byte
            let version = tag.as_bytes().last().copied().unwrap_or(0);
            Err(DecodeError::UnknownVersion(version))
        }
        None => Err(DecodeError::InvalidProtocol(tag)),
    }
}

/// Sender, timestamp and tags of a framed message.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    sender: String,
    time: SystemTime,
    tags: Dictionary,
}

impl MessageHeader {
    /// Header stamped with the current time and no tags.
    pub fn new(sender: impl Into<String>) -> Self {
        MessageHeader { sender: sender.into(), time: SystemTime::now(), tags: Dictionary::new() }
    }

    pub fn with_tags(sender: impl Into<String>, tags: Dictionary) -> Self {
        MessageHeader { sender: sender.into(), time: SystemTime::now(), tags }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn time(&self) -> SystemTime {
        self.time
    }

    pub fn tags(&self) -> &Dictionary {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut Dictionary {
        &mut self.tags
    }

    /// Encode the full header frame for a non-CDTP protocol.
    pub fn assemble(&self, protocol: Protocol) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        encode_tag(protocol, &mut buf);
        self.encode_rest(&mut buf);
        buf.into_vec()
    }

    /// Decode a full header frame for a non-CDTP protocol.
    pub fn disassemble(protocol: Protocol, frame: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = frame;
        decode_tag(protocol, &mut slice)?;
        let header = MessageHeader::decode_rest(&mut slice)?;
        if !slice.is_empty() {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes after header",
                slice.len()
            )));
        }
        Ok(header)
    }

    /// Encode sender, timestamp and tags (everything after the tag).
    pub(crate) fn encode_rest(&self, buf: &mut ByteBuf) {
        infallible(encode::write_str(buf, &self.sender));
        let nanos = self
            .time
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos()
            .min(u128::from(u64::MAX)) as u64;
        infallible(encode::write_uint(buf, nanos));
        self.tags.encode(buf);
    }

    /// Decode sender, timestamp and tags (everything after the tag).
    pub(crate) fn decode_rest(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let sender = decode_str(buf)?;
        let nanos = decode_u64(buf)?;
        let time = UNIX_EPOCH + Duration::from_nanos(nanos);
        let tags = Dictionary::decode(buf)?;
        Ok(MessageHeader { sender, time, tags })
    }
}
