// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Log listener: level-driven subscriptions over `LOG/` topics.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::chirp::ChirpRef;
use crate::config::Dictionary;
use crate::listener::CmdpListener;
use crate::message::CmdpMessage;
use crate::protocol::Level;

/// A decoded `LOG/<LEVEL>[/<topic>]` record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub sender: String,
    pub time: SystemTime,
    pub level: Level,
    /// Sub-topic, empty for bare level records.
    pub topic: String,
    pub message: String,
    pub tags: Dictionary,
}

impl LogRecord {
    fn from_cmdp(msg: &CmdpMessage) -> Option<Self> {
        let level = msg.log_level()?;
        Some(LogRecord {
            sender: msg.header().sender().to_owned(),
            time: msg.header().time(),
            level,
            topic: msg.log_topic().unwrap_or("").to_owned(),
            message: String::from_utf8_lossy(msg.payload()).into_owned(),
            tags: msg.header().tags().clone(),
        })
    }
}

/// Every `LOG/` topic at `level` and above (excluding OFF).
pub fn topics_for_level(level: Level) -> BTreeSet<String> {
    [Level::Trace, Level::Debug, Level::Info, Level::Warning, Level::Status, Level::Critical]
        .into_iter()
        .filter(|l| *l >= level)
        .map(|l| format!("LOG/{l}"))
        .collect()
}

/// Listener decoding log records, subscribed by severity threshold.
pub struct LogListener {
    listener: CmdpListener,
    global_level: Arc<Mutex<Level>>,
}

impl LogListener {
    /// Create a listener; `callback` receives every decoded log record.
    ///
    /// Starts with no subscriptions (level OFF).
    pub fn new(chirp: ChirpRef, callback: impl Fn(LogRecord) + Send + Sync + 'static) -> Self {
        let listener = CmdpListener::new(chirp, move |msg| {
            if let Some(record) = LogRecord::from_cmdp(&msg) {
                callback(record);
            }
        });
        LogListener { listener, global_level: Arc::new(Mutex::new(Level::Off)) }
    }

    pub fn start_pool(&self) {
        self.listener.start_pool();
    }

    pub fn stop_pool(&self) {
        self.listener.stop_pool();
    }

    /// Current severity threshold.
    pub fn global_log_level(&self) -> Level {
        *self.global_level.lock()
    }

    /// Subscribe to every level at `level` and above, dropping the rest.
    pub fn set_global_log_level(&self, level: Level) {
        let mut current = self.global_level.lock();
        let old_topics = topics_for_level(*current);
        let new_topics = topics_for_level(level);

        let unsubscribe: Vec<String> = old_topics.difference(&new_topics).cloned().collect();
        let subscribe: Vec<String> = new_topics.difference(&old_topics).cloned().collect();
        self.listener.multiscribe_topics(&unsubscribe, &subscribe);
        *current = level;
        log::debug!("[cmdp] Global log level set to {level}");
    }

    /// Subscribe one sender to an additional severity threshold.
    pub fn set_extra_log_level(&self, host: &str, level: Level) {
        let current = self.extra_log_topics(host);
        let wanted = topics_for_level(level);
        let unsubscribe: Vec<String> = current.difference(&wanted).cloned().collect();
        let subscribe: Vec<String> = wanted.difference(&current).cloned().collect();
        self.listener.multiscribe_extra_topics(host, &unsubscribe, &subscribe);
    }

    /// Extra `LOG/` topics of one sender.
    fn extra_log_topics(&self, host: &str) -> BTreeSet<String> {
        self.listener
            .extra_topic_subscriptions(host)
            .into_iter()
            .filter(|t| t.starts_with("LOG/"))
            .collect()
    }

    /// The underlying listener, for topic-level control.
    pub fn listener(&self) -> &CmdpListener {
        &self.listener
    }
}
