// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The fixed 42-byte CHIRP discovery datagram.
//!
//! Layout:
//!
//! ```text
//! +--------+---------+--------+-------------+------------+---------+---------+
//! | 'CHIRP'| version | type   | group_id    | host_id    | service | port    |
//! | 5 B    | 1 B     | 1 B    | 16 B (MD5)  | 16 B (MD5) | 1 B     | u16 BE  |
//! +--------+---------+--------+-------------+------------+---------+---------+
//! ```
//!
//! Anything that deviates from this layout is rejected with a
//! [`DecodeError`]; receive loops discard the datagram and keep listening.

use crate::message::{DecodeError, Md5Hash};
use crate::protocol::{ServiceIdentifier, CHIRP_MESSAGE_LENGTH, CHIRP_VERSION};

const CHIRP_MAGIC: &[u8; 5] = b"CHIRP";

/// Discovery datagram types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChirpMessageType {
    /// Ask peers to re-offer services of a given identifier.
    Request = 0x01,
    /// Announce a registered service.
    Offer = 0x02,
    /// Withdraw a previously offered service.
    Depart = 0x03,
}

impl ChirpMessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(ChirpMessageType::Request),
            0x02 => Some(ChirpMessageType::Offer),
            0x03 => Some(ChirpMessageType::Depart),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChirpMessageType::Request => "REQUEST",
            ChirpMessageType::Offer => "OFFER",
            ChirpMessageType::Depart => "DEPART",
        }
    }
}

impl std::fmt::Display for ChirpMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A CHIRP discovery datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChirpMessage {
    msg_type: ChirpMessageType,
    group_id: Md5Hash,
    host_id: Md5Hash,
    service_id: ServiceIdentifier,
    port: u16,
}

impl ChirpMessage {
    pub fn new(
        msg_type: ChirpMessageType,
        group_id: Md5Hash,
        host_id: Md5Hash,
        service_id: ServiceIdentifier,
        port: u16,
    ) -> Self {
        ChirpMessage { msg_type, group_id, host_id, service_id, port }
    }

    /// Build a datagram from plain group and host names.
    pub fn with_names(
        msg_type: ChirpMessageType,
        group: &str,
        host: &str,
        service_id: ServiceIdentifier,
        port: u16,
    ) -> Self {
        ChirpMessage::new(msg_type, Md5Hash::new(group), Md5Hash::new(host), service_id, port)
    }

    pub fn message_type(&self) -> ChirpMessageType {
        self.msg_type
    }

    pub fn group_id(&self) -> Md5Hash {
        self.group_id
    }

    pub fn host_id(&self) -> Md5Hash {
        self.host_id
    }

    pub fn service_id(&self) -> ServiceIdentifier {
        self.service_id
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Assemble the exact 42-byte wire representation.
    pub fn assemble(&self) -> [u8; CHIRP_MESSAGE_LENGTH] {
        let mut buf = [0u8; CHIRP_MESSAGE_LENGTH];
        buf[0..5].copy_from_slice(CHIRP_MAGIC);
        buf[5] = CHIRP_VERSION;
        buf[6] = self.msg_type as u8;
        buf[7..23].copy_from_slice(self.group_id.as_bytes());
        buf[23..39].copy_from_slice(self.host_id.as_bytes());
        buf[39] = self.service_id as u8;
        buf[40..42].copy_from_slice(&self.port.to_be_bytes());
        buf
    }

    /// Validate and decode a received datagram.
    pub fn disassemble(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != CHIRP_MESSAGE_LENGTH {
            return Err(DecodeError::WrongLength {
                expected: CHIRP_MESSAGE_LENGTH,
                received: bytes.len(),
            });
        }
        if &bytes[0..5] != CHIRP_MAGIC {
            return Err(DecodeError::NotChirp);
        }
        if bytes[5] != CHIRP_VERSION {
            return Err(DecodeError::UnknownVersion(bytes[5]));
        }
        let msg_type =
            ChirpMessageType::from_byte(bytes[6]).ok_or(DecodeError::UnknownMessageType(bytes[6]))?;
        let service_id =
            ServiceIdentifier::from_byte(bytes[39]).ok_or(DecodeError::UnknownService(bytes[39]))?;

        let mut group = [0u8; 16];
        group.copy_from_slice(&bytes[7..23]);
        let mut host = [0u8; 16];
        host.copy_from_slice(&bytes[23..39]);

        Ok(ChirpMessage {
            msg_type,
            group_id: Md5Hash::from_bytes(group),
            host_id: Md5Hash::from_bytes(host),
            service_id,
            port: u16::from_be_bytes([bytes[40], bytes[41]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChirpMessage {
        ChirpMessage::with_names(
            ChirpMessageType::Offer,
            "group1",
            "sat1",
            ServiceIdentifier::Control,
            23999,
        )
    }

    #[test]
    fn assemble_disassemble_roundtrip() {
        for msg_type in [
            ChirpMessageType::Request,
            ChirpMessageType::Offer,
            ChirpMessageType::Depart,
        ] {
            for service in [
                ServiceIdentifier::Control,
                ServiceIdentifier::Heartbeat,
                ServiceIdentifier::Monitoring,
                ServiceIdentifier::Data,
            ] {
                let msg = ChirpMessage::with_names(msg_type, "edda", "sat_7", service, 47123);
                let decoded = ChirpMessage::disassemble(&msg.assemble()).expect("valid datagram");
                assert_eq!(decoded, msg);
            }
        }
    }

    #[test]
    fn layout_is_bit_exact() {
        let buf = sample().assemble();
        assert_eq!(&buf[0..5], b"CHIRP");
        assert_eq!(buf[5], 0x01, "version");
        assert_eq!(buf[6], 0x02, "OFFER");
        assert_eq!(&buf[7..23], Md5Hash::new("group1").as_bytes());
        assert_eq!(&buf[23..39], Md5Hash::new("sat1").as_bytes());
        assert_eq!(buf[39], 0x01, "CONTROL");
        assert_eq!(u16::from_be_bytes([buf[40], buf[41]]), 23999);
    }

    #[test]
    fn rejects_wrong_length() {
        let buf = sample().assemble();
        assert_eq!(
            ChirpMessage::disassemble(&buf[..41]),
            Err(DecodeError::WrongLength { expected: 42, received: 41 })
        );
        let mut long = buf.to_vec();
        long.push(0);
        assert_eq!(
            ChirpMessage::disassemble(&long),
            Err(DecodeError::WrongLength { expected: 42, received: 43 })
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = sample().assemble();
        buf[0] = b'X';
        assert_eq!(ChirpMessage::disassemble(&buf), Err(DecodeError::NotChirp));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut buf = sample().assemble();
        buf[5] = 0x02;
        assert_eq!(ChirpMessage::disassemble(&buf), Err(DecodeError::UnknownVersion(0x02)));
    }

    #[test]
    fn rejects_unknown_type_and_service() {
        let mut buf = sample().assemble();
        buf[6] = 0x04;
        assert_eq!(ChirpMessage::disassemble(&buf), Err(DecodeError::UnknownMessageType(0x04)));

        let mut buf = sample().assemble();
        buf[39] = 0x09;
        assert_eq!(ChirpMessage::disassemble(&buf), Err(DecodeError::UnknownService(0x09)));
    }
}
