// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CMDP monitoring messages: a topic, a header and a payload.
//!
//! Frame layout: `[topic][header][payload]`. The topic travels as the raw
//! first frame so publisher-side prefix filtering works on it directly.
//!
//! Topic grammar:
//!
//! ```text
//! LOG/<LEVEL>[/<topic>]   log record, payload is the message text
//! STAT/<METRIC>           telemetry value, payload is msgpack
//! LOG?  /  STAT?          notification: payload maps topics to descriptions
//! ```

use crate::message::header::{MessageHeader, Protocol};
use crate::message::DecodeError;
use crate::protocol::Level;
use crate::transport::Multipart;

/// A CMDP pub/sub message.
#[derive(Debug, Clone, PartialEq)]
pub struct CmdpMessage {
    topic: String,
    header: MessageHeader,
    payload: Vec<u8>,
}

impl CmdpMessage {
    pub fn new(topic: impl Into<String>, header: MessageHeader, payload: Vec<u8>) -> Self {
        CmdpMessage { topic: topic.into(), header, payload }
    }

    /// Build a log record message.
    pub fn log(
        sender: impl Into<String>,
        level: Level,
        topic: Option<&str>,
        text: &str,
    ) -> Self {
        let full_topic = match topic {
            Some(t) => format!("LOG/{level}/{}", t.to_uppercase()),
            None => format!("LOG/{level}"),
        };
        CmdpMessage::new(full_topic, MessageHeader::new(sender), text.as_bytes().to_vec())
    }

    /// Build a telemetry value message.
    pub fn stat(sender: impl Into<String>, metric: &str, payload: Vec<u8>) -> Self {
        CmdpMessage::new(
            format!("STAT/{}", metric.to_uppercase()),
            MessageHeader::new(sender),
            payload,
        )
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True for `LOG/...` records.
    pub fn is_log(&self) -> bool {
        self.topic.starts_with("LOG/")
    }

    /// True for `STAT/...` records.
    pub fn is_stat(&self) -> bool {
        self.topic.starts_with("STAT/")
    }

    /// True for `LOG?` / `STAT?` notification messages.
    pub fn is_notification(&self) -> bool {
        self.topic == "LOG?" || self.topic == "STAT?"
    }

    /// Log level encoded in the topic, for `LOG/` records.
    pub fn log_level(&self) -> Option<Level> {
        let rest = self.topic.strip_prefix("LOG/")?;
        let level = rest.split('/').next()?;
        Level::from_topic(level)
    }

    /// Sub-topic of a `LOG/<LEVEL>/<topic>` record, empty for bare levels.
    pub fn log_topic(&self) -> Option<&str> {
        let rest = self.topic.strip_prefix("LOG/")?;
        Some(rest.split_once('/').map(|(_, topic)| topic).unwrap_or(""))
    }

    /// Metric name of a `STAT/<METRIC>` record.
    pub fn stat_metric(&self) -> Option<&str> {
        self.topic.strip_prefix("STAT/")
    }

    /// Assemble into transport frames.
    pub fn assemble(&self) -> Multipart {
        vec![
            self.topic.as_bytes().to_vec(),
            self.header.assemble(Protocol::Cmdp),
            self.payload.clone(),
        ]
    }

    /// Decode from transport frames.
    pub fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        if frames.len() != 3 {
            return Err(DecodeError::Malformed(format!(
                "CMDP message has {} frames, expected 3",
                frames.len()
            )));
        }
        let topic = String::from_utf8(frames[0].clone())
            .map_err(|_| DecodeError::Malformed("CMDP topic is not valid UTF-8".into()))?;
        if !(topic.starts_with("LOG/")
            || topic.starts_with("STAT/")
            || topic == "LOG?"
            || topic == "STAT?")
        {
            return Err(DecodeError::Malformed(format!("invalid CMDP topic {topic:?}")));
        }
        let header = MessageHeader::disassemble(Protocol::Cmdp, &frames[1])?;
        Ok(CmdpMessage { topic, header, payload: frames[2].clone() })
    }
}
