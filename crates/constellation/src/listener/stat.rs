// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stat listener: telemetry consumption over `STAT/` topics.

use std::time::SystemTime;

use crate::chirp::ChirpRef;
use crate::listener::CmdpListener;
use crate::message::CmdpMessage;
use crate::telemetry::StatValue;

/// A decoded `STAT/<METRIC>` sample.
#[derive(Debug, Clone)]
pub struct StatRecord {
    pub sender: String,
    pub time: SystemTime,
    pub metric: String,
    pub stat: StatValue,
}

impl StatRecord {
    fn from_cmdp(msg: &CmdpMessage) -> Option<Self> {
        let metric = msg.stat_metric()?.to_owned();
        let stat = match StatValue::disassemble(msg.payload()) {
            Ok(stat) => stat,
            Err(e) => {
                log::warn!("[cmdp] Undecodable stat payload for {metric}: {e}");
                return None;
            }
        };
        Some(StatRecord {
            sender: msg.header().sender().to_owned(),
            time: msg.header().time(),
            metric,
            stat,
        })
    }
}

/// Listener decoding telemetry samples.
pub struct StatListener {
    listener: CmdpListener,
}

impl StatListener {
    /// Create a listener; `callback` receives every decoded sample.
    pub fn new(chirp: ChirpRef, callback: impl Fn(StatRecord) + Send + Sync + 'static) -> Self {
        let listener = CmdpListener::new(chirp, move |msg| {
            if let Some(record) = StatRecord::from_cmdp(&msg) {
                callback(record);
            }
        });
        StatListener { listener }
    }

    pub fn start_pool(&self) {
        self.listener.start_pool();
    }

    pub fn stop_pool(&self) {
        self.listener.stop_pool();
    }

    /// Subscribe every sender's samples for one metric.
    pub fn subscribe_metric(&self, metric: &str) {
        self.listener.subscribe_topic(format!("STAT/{}", metric.to_uppercase()));
    }

    /// Unsubscribe one metric.
    pub fn unsubscribe_metric(&self, metric: &str) {
        self.listener.unsubscribe_topic(format!("STAT/{}", metric.to_uppercase()));
    }

    /// Subscribe to every metric of every sender.
    pub fn subscribe_all(&self) {
        self.listener.subscribe_topic("STAT/");
    }

    /// The underlying listener, for per-sender control.
    pub fn listener(&self) -> &CmdpListener {
        &self.listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Value;
    use crate::telemetry::MetricType;

    #[test]
    fn record_decoding() {
        let payload = StatValue {
            value: Value::Int(1024),
            unit: "events".into(),
            metric_type: MetricType::Accumulate,
        }
        .assemble();
        let msg = CmdpMessage::stat("Dummy.s1", "count", payload);

        let record = StatRecord::from_cmdp(&msg).expect("stat record");
        assert_eq!(record.metric, "COUNT");
        assert_eq!(record.stat.value, Value::Int(1024));
        assert_eq!(record.stat.metric_type, MetricType::Accumulate);
    }

    #[test]
    fn garbage_payload_is_dropped() {
        let msg = CmdpMessage::stat("Dummy.s1", "count", vec![0xFF, 0xFF]);
        assert!(StatRecord::from_cmdp(&msg).is_none());
    }
}
