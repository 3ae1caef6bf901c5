// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CDTP transmitter capability.
//!
//! Owned by the FSM worker and therefore serialized with transitions: all
//! sends happen from lifecycle hooks or the RUN hook. BOR and EOR are
//! critical sends with configurable timeouts; a timeout surfaces as
//! [`SatelliteError::SendTimeout`] and takes the FSM to ERROR.

use std::time::Duration;

use crate::config::{Configuration, Dictionary, Group, IntoValue, Usage};
use crate::message::cdtp::{CdtpHeader, CdtpMessage};
use crate::protocol::cdtp::{MessageType, RunCondition};
use crate::satellite::SatelliteError;
use crate::transport::PushSocket;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// CDTP producer bound to an ephemeral port.
pub struct DataTransmitter {
    socket: PushSocket,
    sender_name: String,
    seq: u64,
    bor_timeout: Duration,
    eor_timeout: Duration,
    data_timeout: Duration,
    bor_tags: Dictionary,
    eor_tags: Dictionary,
    run_metadata: Dictionary,
    condition: RunCondition,
    license: Option<String>,
    run_id: String,
    run_active: bool,
}

impl DataTransmitter {
    pub fn new(sender_name: impl Into<String>) -> std::io::Result<Self> {
        let socket = PushSocket::bind()?;
        log::info!("[cdtp] Data will be sent on port {}", socket.port());
        Ok(DataTransmitter {
            socket,
            sender_name: sender_name.into(),
            seq: 0,
            bor_timeout: DEFAULT_TIMEOUT,
            eor_timeout: DEFAULT_TIMEOUT,
            data_timeout: DEFAULT_TIMEOUT,
            bor_tags: Dictionary::new(),
            eor_tags: Dictionary::new(),
            run_metadata: Dictionary::new(),
            condition: RunCondition::GOOD,
            license: None,
            run_id: String::new(),
            run_active: false,
        })
    }

    /// Port of the push socket, for CHIRP registration.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Consume the framework keys of the initialize configuration.
    pub fn initializing(&mut self, config: &mut Configuration) -> Result<(), SatelliteError> {
        self.bor_timeout = Duration::from_secs(config.get_or("_bor_timeout", 10u64)?);
        self.eor_timeout = Duration::from_secs(config.get_or("_eor_timeout", 10u64)?);
        self.data_timeout = Duration::from_secs(config.get_or("_data_timeout", 10u64)?);
        self.license = if config.has("_data_license") {
            Some(config.get::<String>("_data_license")?)
        } else {
            None
        };
        log::debug!(
            "[cdtp] Timeouts: BOR {:?}, EOR {:?}, DATA {:?}",
            self.bor_timeout,
            self.eor_timeout,
            self.data_timeout
        );
        Ok(())
    }

    /// Apply reconfigurable keys.
    pub fn reconfiguring(&mut self, partial: &Configuration) -> Result<(), SatelliteError> {
        if partial.has("_bor_timeout") {
            self.bor_timeout = Duration::from_secs(partial.get::<u64>("_bor_timeout")?);
        }
        if partial.has("_eor_timeout") {
            self.eor_timeout = Duration::from_secs(partial.get::<u64>("_eor_timeout")?);
        }
        if partial.has("_data_timeout") {
            self.data_timeout = Duration::from_secs(partial.get::<u64>("_data_timeout")?);
        }
        if partial.has("_data_license") {
            self.license = Some(partial.get::<String>("_data_license")?);
        }
        Ok(())
    }

    /// Set a tag attached to the next BOR message header.
    pub fn set_bor_tag(&mut self, key: &str, value: impl IntoValue) {
        self.bor_tags.insert(key, value);
    }

    /// Set a tag attached to the next EOR message header.
    pub fn set_eor_tag(&mut self, key: &str, value: impl IntoValue) {
        self.eor_tags.insert(key, value);
    }

    /// Record a key in the run metadata shipped in the EOR payload.
    pub fn set_run_metadata_tag(&mut self, key: &str, value: impl IntoValue) {
        self.run_metadata.insert(key, value);
    }

    /// OR `TAINTED` into the outgoing run condition.
    pub fn mark_run_tainted(&mut self) {
        self.condition |= RunCondition::TAINTED;
    }

    /// Current outgoing run condition.
    pub fn run_condition(&self) -> RunCondition {
        self.condition
    }

    /// Send the Begin-of-Run delimiter; called by the `starting` wrapper.
    ///
    /// The BOR header carries the framework version, the run id and the
    /// optional data license plus user tags; the single payload frame is
    /// the satellite's effective configuration.
    pub fn starting(
        &mut self,
        run_id: &str,
        config: &Configuration,
    ) -> Result<(), SatelliteError> {
        self.seq = 0;
        self.condition = RunCondition::GOOD;
        self.run_metadata = Dictionary::new();
        self.run_id = run_id.to_owned();
        self.run_active = true;

        let mut tags = std::mem::take(&mut self.bor_tags);
        tags.insert("version", crate::VERSION);
        tags.insert("version_full", crate::VERSION_FULL);
        tags.insert("run_id", run_id);
        if let Some(license) = &self.license {
            tags.insert("license", license.clone());
        }

        let header = CdtpHeader::with_tags(self.sender_name.clone(), 0, MessageType::Bor, tags);
        let mut msg = CdtpMessage::new(header);
        msg.add_payload(config.get_dictionary(Group::All, Usage::Any).assemble());

        log::debug!("[cdtp] Sending BOR message (timeout {:?})", self.bor_timeout);
        let sent = self.socket.send(&msg.assemble(), self.bor_timeout)?;
        if !sent {
            return Err(SatelliteError::SendTimeout {
                what: "BOR message",
                timeout: self.bor_timeout,
            });
        }
        log::debug!("[cdtp] Sent BOR message");
        Ok(())
    }

    /// Build the next DATA message with room for `frames` payload frames.
    pub fn new_data_message(&mut self, frames: usize) -> CdtpMessage {
        self.seq += 1;
        CdtpMessage::with_frames(
            CdtpHeader::new(self.sender_name.clone(), self.seq, MessageType::Data),
            frames,
        )
    }

    /// Send a DATA message, waiting up to the data timeout.
    ///
    /// Returns false when the message could not be handed off in time; the
    /// caller may retry or drop it.
    pub fn try_send_data_message(&mut self, msg: &CdtpMessage) -> bool {
        log::trace!("[cdtp] Sending data message {}", msg.header().sequence());
        match self.socket.send(&msg.assemble(), self.data_timeout) {
            Ok(true) => true,
            Ok(false) => {
                log::debug!("[cdtp] Could not send message {}", msg.header().sequence());
                false
            }
            Err(e) => {
                log::debug!("[cdtp] Send of message {} failed: {e}", msg.header().sequence());
                false
            }
        }
    }

    /// Send a DATA message, raising on timeout.
    pub fn send_data_message(&mut self, msg: &CdtpMessage) -> Result<(), SatelliteError> {
        log::trace!("[cdtp] Sending data message {}", msg.header().sequence());
        let sent = self.socket.send(&msg.assemble(), self.data_timeout)?;
        if !sent {
            return Err(SatelliteError::SendTimeout {
                what: "data message",
                timeout: self.data_timeout,
            });
        }
        Ok(())
    }

    /// Send the End-of-Run delimiter; called by the `stopping` wrapper.
    pub fn stopping(&mut self) -> Result<(), SatelliteError> {
        if !self.run_active {
            return Ok(());
        }
        self.run_active = false;
        self.send_eor()
    }

    /// EOR on the interrupt path: condition gains `INTERRUPTED`, delivery
    /// is best effort (the receiver synthesizes an aborted EOR otherwise).
    pub fn interrupting(&mut self) {
        if !self.run_active {
            return;
        }
        self.condition |= RunCondition::INTERRUPTED;
        if let Err(e) = self.send_eor() {
            log::warn!("[cdtp] Failed to send EOR while interrupting: {e}");
        }
        self.run_active = false;
    }

    /// Cleanup on the failure path: no EOR is attempted, the receiver will
    /// append a synthetic one.
    pub fn failure(&mut self) {
        if self.run_active {
            self.condition |= RunCondition::ABORTED;
            self.run_active = false;
        }
    }

    fn send_eor(&mut self) -> Result<(), SatelliteError> {
        self.seq += 1;

        let mut metadata = std::mem::take(&mut self.run_metadata);
        metadata.insert("condition", self.condition.to_string());
        metadata.insert("condition_code", i64::from(self.condition.bits()));
        metadata.insert("version", crate::VERSION);
        metadata.insert("version_full", crate::VERSION_FULL);
        metadata.insert("run_id", self.run_id.clone());
        if let Some(license) = &self.license {
            metadata.insert("license", license.clone());
        }

        let tags = std::mem::take(&mut self.eor_tags);
        let header =
            CdtpHeader::with_tags(self.sender_name.clone(), self.seq, MessageType::Eor, tags);
        let mut msg = CdtpMessage::new(header);
        msg.add_payload(metadata.assemble());

        log::debug!("[cdtp] Sending EOR message (timeout {:?})", self.eor_timeout);
        let sent = self.socket.send(&msg.assemble(), self.eor_timeout)?;
        if !sent {
            return Err(SatelliteError::SendTimeout {
                what: "EOR message",
                timeout: self.eor_timeout,
            });
        }
        log::debug!("[cdtp] Sent EOR message");
        Ok(())
    }
}
