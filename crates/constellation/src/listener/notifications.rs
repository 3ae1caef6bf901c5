// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic inventory notifications (`LOG?` / `STAT?`).
//!
//! Subscribing to `LOG?` or `STAT?` asks each sender to publish a
//! dictionary mapping its available topics to human-readable descriptions.
//! This module keeps the per-sender inventories a listener has received so
//! user interfaces can offer topic pickers.

use std::collections::BTreeMap;

use dashmap::DashMap;

use crate::config::Value;
use crate::message::CmdpMessage;

/// The advertised topics of one sender.
pub type TopicInventory = BTreeMap<String, String>;

/// Per-sender bookkeeping of received topic inventories.
#[derive(Default)]
pub struct Notifications {
    /// Keyed by sender canonical name.
    inventories: DashMap<String, TopicInventory>,
}

impl Notifications {
    pub fn new() -> Self {
        Notifications::default()
    }

    /// Ingest a message if it is a notification; returns whether it was.
    pub fn ingest(&self, msg: &CmdpMessage) -> bool {
        if !msg.is_notification() {
            return false;
        }
        let dict = match crate::config::Dictionary::disassemble(msg.payload()) {
            Ok(dict) => dict,
            Err(e) => {
                log::warn!("[cmdp] Undecodable {} notification: {e}", msg.topic());
                return true;
            }
        };
        let inventory: TopicInventory = dict
            .into_iter()
            .map(|(topic, description)| {
                let text = match description {
                    Value::Str(s) => s,
                    other => other.to_string(),
                };
                (topic, text)
            })
            .collect();
        log::debug!(
            "[cmdp] {} advertises {} topics",
            msg.header().sender(),
            inventory.len()
        );
        self.inventories.insert(msg.header().sender().to_owned(), inventory);
        true
    }

    /// Inventory of one sender, if received.
    pub fn topics_of(&self, sender: &str) -> Option<TopicInventory> {
        self.inventories.get(sender).map(|entry| entry.value().clone())
    }

    /// All senders with a known inventory.
    pub fn senders(&self) -> Vec<String> {
        self.inventories.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Drop a sender's inventory (on departure).
    pub fn forget(&self, sender: &str) {
        self.inventories.remove(sender);
    }
}
