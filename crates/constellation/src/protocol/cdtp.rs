// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CDTP definitions: run conditions attached to End-of-Run messages.

/// Bit-flag set describing how a data run concluded.
///
/// Conditions are combinable with `|`; a run is `GOOD` only when no flag is
/// set. The receiver merges the condition reported by the transmitter in
/// the EOR with anything it detected locally (sequence gaps, missing EOR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunCondition(u8);

impl RunCondition {
    /// Run concluded normally, nothing else to report.
    pub const GOOD: RunCondition = RunCondition(0x00);
    /// Data was marked as tainted by the sender.
    pub const TAINTED: RunCondition = RunCondition(0x01);
    /// The receiver noticed missing messages in the sequence.
    pub const INCOMPLETE: RunCondition = RunCondition(0x02);
    /// The run was interrupted because of a failure elsewhere in the swarm.
    pub const INTERRUPTED: RunCondition = RunCondition(0x40);
    /// The sender aborted without an orderly stop; the EOR was appended by
    /// the receiver.
    pub const ABORTED: RunCondition = RunCondition(0x80);

    /// Rebuild a condition from its wire byte, dropping undefined bits.
    pub fn from_bits(bits: u8) -> Self {
        RunCondition(bits & 0xC3)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn contains(&self, other: RunCondition) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_good(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for RunCondition {
    type Output = RunCondition;

    fn bitor(self, rhs: RunCondition) -> RunCondition {
        RunCondition(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for RunCondition {
    fn bitor_assign(&mut self, rhs: RunCondition) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Display for RunCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return f.write_str("GOOD");
        }
        let mut first = true;
        for (flag, name) in [
            (RunCondition::TAINTED, "TAINTED"),
            (RunCondition::INCOMPLETE, "INCOMPLETE"),
            (RunCondition::INTERRUPTED, "INTERRUPTED"),
            (RunCondition::ABORTED, "ABORTED"),
        ] {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Message types bracketing and filling a CDTP run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Begin-of-Run delimiter, sequence number 0.
    Bor = 0x00,
    /// Payload message, sequence numbers 1..N.
    Data = 0x01,
    /// End-of-Run delimiter, sequence number N+1.
    Eor = 0x02,
}

impl MessageType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(MessageType::Bor),
            0x01 => Some(MessageType::Data),
            0x02 => Some(MessageType::Eor),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageType::Bor => "BOR",
            MessageType::Data => "DATA",
            MessageType::Eor => "EOR",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_algebra() {
        let cond = RunCondition::TAINTED | RunCondition::INTERRUPTED;
        assert!(cond.contains(RunCondition::TAINTED));
        assert!(cond.contains(RunCondition::INTERRUPTED));
        assert!(!cond.contains(RunCondition::ABORTED));
        assert!(!cond.is_good());
        assert_eq!(cond.bits(), 0x41);
        assert_eq!(RunCondition::from_bits(cond.bits()), cond);
    }

    #[test]
    fn condition_display() {
        assert_eq!(RunCondition::GOOD.to_string(), "GOOD");
        assert_eq!(RunCondition::TAINTED.to_string(), "TAINTED");
        assert_eq!(
            (RunCondition::TAINTED | RunCondition::INTERRUPTED).to_string(),
            "TAINTED|INTERRUPTED"
        );
        assert_eq!(
            (RunCondition::INCOMPLETE | RunCondition::ABORTED).to_string(),
            "INCOMPLETE|ABORTED"
        );
    }

    #[test]
    fn undefined_bits_are_dropped() {
        assert_eq!(RunCondition::from_bits(0xFF).bits(), 0xC3);
    }

    #[test]
    fn message_type_roundtrip() {
        for t in [MessageType::Bor, MessageType::Data, MessageType::Eor] {
            assert_eq!(MessageType::from_byte(t as u8), Some(t));
        }
        assert_eq!(MessageType::from_byte(0x03), None);
    }
}
