// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metric descriptors and the `STAT/` wire payload.
//!
//! A metric value travels as a msgpack stream of the value itself, the
//! unit string and the metric type byte. The metric name lives in the
//! topic (`STAT/<METRIC>`), never in the payload.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_str, decode_u8, infallible};
use crate::config::Value;
use crate::message::{CmdpMessage, DecodeError};

/// How a consumer should aggregate a metric over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MetricType {
    /// Show the latest value.
    LastValue = 0x01,
    /// Sum values over the run.
    Accumulate = 0x02,
    /// Average values over the run.
    Average = 0x03,
    /// Divide the accumulated value by elapsed time.
    Rate = 0x04,
}

impl MetricType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(MetricType::LastValue),
            0x02 => Some(MetricType::Accumulate),
            0x03 => Some(MetricType::Average),
            0x04 => Some(MetricType::Rate),
            _ => None,
        }
    }
}

/// Descriptor of one metric.
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub unit: String,
    pub metric_type: MetricType,
    pub description: String,
}

impl Metric {
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        metric_type: MetricType,
        description: impl Into<String>,
    ) -> Self {
        Metric {
            name: name.into().to_uppercase(),
            unit: unit.into(),
            metric_type,
            description: description.into(),
        }
    }
}

/// A decoded metric sample.
#[derive(Debug, Clone, PartialEq)]
pub struct StatValue {
    pub value: Value,
    pub unit: String,
    pub metric_type: MetricType,
}

impl StatValue {
    /// Encode as a `STAT/` payload.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        self.value.encode(&mut buf);
        infallible(encode::write_str(&mut buf, &self.unit));
        infallible(encode::write_uint(&mut buf, u64::from(self.metric_type as u8)));
        buf.into_vec()
    }

    /// Decode from a `STAT/` payload.
    pub fn disassemble(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = bytes;
        let value = Value::decode(&mut slice)?;
        let unit = decode_str(&mut slice)?;
        let type_byte = decode_u8(&mut slice)?;
        let metric_type =
            MetricType::from_byte(type_byte).ok_or(DecodeError::UnknownMessageType(type_byte))?;
        if !slice.is_empty() {
            return Err(DecodeError::Malformed("trailing bytes after stat value".into()));
        }
        Ok(StatValue { value, unit, metric_type })
    }
}

/// Sink a metrics manager publishes through (the satellite's CMDP sender).
pub type StatSink = Arc<dyn Fn(CmdpMessage) + Send + Sync>;

/// Registry of metrics and the publishing front-end.
pub struct MetricsManager {
    sender_name: String,
    metrics: Mutex<BTreeMap<String, Metric>>,
    sink: StatSink,
}

impl MetricsManager {
    pub fn new(sender_name: impl Into<String>, sink: StatSink) -> Self {
        MetricsManager { sender_name: sender_name.into(), metrics: Mutex::new(BTreeMap::new()), sink }
    }

    /// Register a metric so notification inventories can describe it.
    pub fn register_metric(&self, metric: Metric) {
        log::debug!("[stat] Registered metric {}", metric.name);
        self.metrics.lock().insert(metric.name.clone(), metric);
    }

    pub fn unregister_metric(&self, name: &str) {
        self.metrics.lock().remove(&name.to_uppercase());
    }

    /// Topic inventory for `STAT?` notifications.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.metrics
            .lock()
            .values()
            .map(|m| (format!("STAT/{}", m.name), m.description.clone()))
            .collect()
    }

    /// Publish one sample for a registered metric.
    ///
    /// Samples for unknown metrics are dropped with a log message.
    pub fn send_metric(&self, name: &str, value: impl crate::config::IntoValue) {
        let name = name.to_uppercase();
        let payload = {
            let metrics = self.metrics.lock();
            let Some(metric) = metrics.get(&name) else {
                log::warn!("[stat] Dropping sample for unregistered metric {name}");
                return;
            };
            StatValue {
                value: value.into_value(),
                unit: metric.unit.clone(),
                metric_type: metric.metric_type,
            }
            .assemble()
        };
        (self.sink)(CmdpMessage::stat(self.sender_name.clone(), &name, payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_value_roundtrip() {
        let stat = StatValue {
            value: Value::Float(3.5),
            unit: "MB/s".into(),
            metric_type: MetricType::Rate,
        };
        let decoded = StatValue::disassemble(&stat.assemble()).expect("decode");
        assert_eq!(decoded, stat);
    }

    #[test]
    fn unknown_metric_type_is_rejected() {
        let stat = StatValue {
            value: Value::Int(1),
            unit: "".into(),
            metric_type: MetricType::LastValue,
        };
        let mut bytes = stat.assemble();
        let last = bytes.len() - 1;
        bytes[last] = 0x60;
        assert!(StatValue::disassemble(&bytes).is_err());
    }

    #[test]
    fn manager_drops_unregistered_samples() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let manager = MetricsManager::new(
            "Dummy.s1",
            Arc::new(move |msg: CmdpMessage| sink_seen.lock().push(msg.topic().to_owned())),
        );

        manager.send_metric("rate", 1i64);
        assert!(seen.lock().is_empty());

        manager.register_metric(Metric::new("rate", "Hz", MetricType::LastValue, "event rate"));
        manager.send_metric("rate", 2i64);
        assert_eq!(seen.lock().as_slice(), &["STAT/RATE".to_owned()]);
    }
}
