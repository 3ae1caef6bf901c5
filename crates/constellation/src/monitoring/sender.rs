// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CMDP publisher a satellite exposes as its `MONITORING` service.
//!
//! Publishes `LOG/` records and `STAT/` samples, and answers `LOG?` /
//! `STAT?` subscriptions with topic inventory notifications. A maintenance
//! thread pumps the socket so subscriptions and notifications work even
//! when nothing is being published.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Dictionary;
use crate::message::{CmdpMessage, MessageHeader};
use crate::protocol::Level;
use crate::transport::PubSocket;

/// Provider of the current `STAT?` inventory (topic, description) pairs.
pub type InventoryProvider = Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>;

struct SenderInner {
    socket: Mutex<PubSocket>,
    sender_name: String,
    log_topics: Mutex<BTreeMap<String, String>>,
    stat_inventory: Mutex<Option<InventoryProvider>>,
    stop: AtomicBool,
}

/// Cloneable CMDP publishing handle.
#[derive(Clone)]
pub struct MonitoringSender {
    inner: Arc<SenderInner>,
    port: u16,
    thread: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MonitoringSender {
    /// Bind the publisher and start the maintenance thread.
    pub fn new(sender_name: impl Into<String>) -> std::io::Result<Self> {
        let socket = PubSocket::bind()?;
        let port = socket.port();
        let inner = Arc::new(SenderInner {
            socket: Mutex::new(socket),
            sender_name: sender_name.into(),
            log_topics: Mutex::new(BTreeMap::new()),
            stat_inventory: Mutex::new(None),
            stop: AtomicBool::new(false),
        });
        let thread = {
            let inner = Arc::clone(&inner);
            Arc::new(Mutex::new(Some(std::thread::spawn(move || maintenance_loop(inner)))))
        };
        log::info!("[cmdp] Publishing monitoring data on port {port}");
        Ok(MonitoringSender { inner, port, thread })
    }

    /// Port of the publisher, for CHIRP registration.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Publish a log record.
    pub fn send_log(&self, level: Level, topic: Option<&str>, text: &str) {
        let msg = CmdpMessage::log(self.inner.sender_name.clone(), level, topic, text);
        self.send_message(msg);
    }

    /// Publish a prepared CMDP message (metrics managers use this).
    pub fn send_message(&self, msg: CmdpMessage) {
        if let Err(e) = self.inner.socket.lock().publish(&msg.assemble()) {
            log::warn!("[cmdp] Failed to publish on {}: {e}", msg.topic());
        }
    }

    /// Advertise a log topic for `LOG?` inventories.
    pub fn advertise_log_topic(&self, topic: impl Into<String>, description: impl Into<String>) {
        self.inner.log_topics.lock().insert(topic.into(), description.into());
    }

    /// Install the provider answering `STAT?` inventories.
    pub fn set_stat_inventory_provider(&self, provider: InventoryProvider) {
        *self.inner.stat_inventory.lock() = Some(provider);
    }

    /// Shut down the maintenance thread.
    pub fn close(&self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn maintenance_loop(inner: Arc<SenderInner>) {
    while !inner.stop.load(Ordering::Relaxed) {
        let events = {
            let mut socket = inner.socket.lock();
            if let Err(e) = socket.pump(Duration::from_millis(50)) {
                log::warn!("[cmdp] Publisher maintenance failed: {e}");
                Vec::new()
            } else {
                socket.take_subscription_events()
            }
        };

        for event in events {
            if !event.subscribe {
                continue;
            }
            match event.topic.as_slice() {
                b"LOG?" => {
                    let dict: Dictionary = inner
                        .log_topics
                        .lock()
                        .iter()
                        .map(|(topic, desc)| {
                            (topic.clone(), crate::config::Value::Str(desc.clone()))
                        })
                        .collect();
                    publish_notification(&inner, "LOG?", dict);
                }
                b"STAT?" => {
                    let provider = inner.stat_inventory.lock().clone();
                    let dict: Dictionary = provider
                        .map(|p| p())
                        .unwrap_or_default()
                        .into_iter()
                        .map(|(topic, desc)| (topic, crate::config::Value::Str(desc)))
                        .collect();
                    publish_notification(&inner, "STAT?", dict);
                }
                _ => {}
            }
        }
    }
}

fn publish_notification(inner: &SenderInner, topic: &str, dict: Dictionary) {
    log::debug!("[cmdp] Answering {topic} with {} topics", dict.len());
    let msg = CmdpMessage::new(
        topic,
        MessageHeader::new(inner.sender_name.clone()),
        dict.assemble(),
    );
    if let Err(e) = inner.socket.lock().publish(&msg.assemble()) {
        log::warn!("[cmdp] Failed to publish {topic} notification: {e}");
    }
}
