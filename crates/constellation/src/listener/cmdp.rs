// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CMDP listener: a subscriber pool plus a subscription ledger.
//!
//! The ledger guarantees that for every connected sender *H* the active
//! subscriptions at *H* are exactly `global ∪ extras(H)`: no duplicate
//! subscribe frames are sent, removing a global topic re-subscribes it for
//! senders that still hold it as an extra, and extra operations suppress
//! socket traffic for topics already covered globally.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::chirp::ChirpRef;
use crate::message::{CmdpMessage, Md5Hash};
use crate::pools::{PoolCallbacks, SubscriberPool};
use crate::protocol::ServiceIdentifier;

#[derive(Default)]
struct Ledger {
    global: BTreeSet<String>,
    /// Keyed by sender canonical name; compared to host ids via MD5.
    extra: BTreeMap<String, BTreeSet<String>>,
}

/// Pool over `MONITORING` publishers with topic bookkeeping.
pub struct CmdpListener {
    pool: Arc<SubscriberPool<CmdpMessage>>,
    ledger: Arc<Mutex<Ledger>>,
}

impl CmdpListener {
    /// Create a listener; `callback` receives every decoded CMDP message.
    pub fn new(chirp: ChirpRef, callback: impl Fn(CmdpMessage) + Send + Sync + 'static) -> Self {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let hook_ledger = Arc::clone(&ledger);
        let pool = Arc::new(SubscriberPool::new(
            "cmdp",
            ServiceIdentifier::Monitoring,
            chirp,
            PoolCallbacks {
                message: Box::new(callback),
                should_connect: Box::new(|_| true),
                host_connected: Box::new(move |pool, service| {
                    // Replay globals first, then the host's extras
                    let ledger = hook_ledger.lock();
                    for topic in &ledger.global {
                        pool.subscribe_host(service.host_id, topic);
                    }
                    if let Some((_, extras)) = ledger
                        .extra
                        .iter()
                        .find(|(host, _)| Md5Hash::new(host) == service.host_id)
                    {
                        for topic in extras {
                            if !ledger.global.contains(topic) {
                                pool.subscribe_host(service.host_id, topic);
                            }
                        }
                    }
                }),
                host_disconnected: Box::new(|_| {}),
                host_disposed: Box::new(|_| {}),
            },
        ));
        CmdpListener { pool, ledger }
    }

    /// Start receiving (starts the pool and hooks into CHIRP).
    pub fn start_pool(&self) {
        self.pool.start_pool();
    }

    /// Stop receiving and disconnect from every sender.
    pub fn stop_pool(&self) {
        self.pool.stop_pool();
    }

    /// Re-raise a failure captured by the pool loop.
    pub fn check_exception(&self) -> Result<(), crate::pools::PoolError> {
        self.pool.check_exception()
    }

    /// Number of connected senders.
    pub fn connected_count(&self) -> usize {
        self.pool.connected_count()
    }

    /// Subscribe a topic on every sender.
    pub fn subscribe_topic(&self, topic: impl Into<String>) {
        self.multiscribe_topics(&[], &[topic.into()]);
    }

    /// Unsubscribe a topic from every sender.
    pub fn unsubscribe_topic(&self, topic: impl Into<String>) {
        self.multiscribe_topics(&[topic.into()], &[]);
    }

    /// Apply a batch of global unsubscriptions and subscriptions.
    pub fn multiscribe_topics(&self, unsubscribe: &[String], subscribe: &[String]) {
        let ledger = &mut *self.ledger.lock();

        let mut actually_unsubscribed: BTreeSet<&String> = BTreeSet::new();
        for topic in unsubscribe {
            if ledger.global.remove(topic) {
                self.pool.unsubscribe(topic);
                actually_unsubscribed.insert(topic);
            }
        }
        for topic in subscribe {
            if ledger.global.insert(topic.clone()) {
                self.pool.subscribe(topic);
            }
        }
        // Preserve extras that were shadowed by a just-removed global
        for (host, topics) in &ledger.extra {
            for topic in topics {
                if actually_unsubscribed.contains(topic) {
                    self.pool.subscribe_host(Md5Hash::new(host), topic);
                }
            }
        }
    }

    /// Snapshot of the global topic set.
    pub fn topic_subscriptions(&self) -> BTreeSet<String> {
        self.ledger.lock().global.clone()
    }

    /// Subscribe an extra topic on one sender.
    pub fn subscribe_extra_topic(&self, host: &str, topic: impl Into<String>) {
        self.multiscribe_extra_topics(host, &[], &[topic.into()]);
    }

    /// Unsubscribe an extra topic from one sender.
    pub fn unsubscribe_extra_topic(&self, host: &str, topic: impl Into<String>) {
        self.multiscribe_extra_topics(host, &[topic.into()], &[]);
    }

    /// Apply a batch of per-sender extra (un)subscriptions.
    pub fn multiscribe_extra_topics(
        &self,
        host: &str,
        unsubscribe: &[String],
        subscribe: &[String],
    ) {
        let ledger = &mut *self.ledger.lock();
        let host_id = Md5Hash::new(host);
        let topics = ledger.extra.entry(host.to_owned()).or_default();

        for topic in unsubscribe {
            // Socket traffic only when not covered by a global subscription
            if topics.remove(topic) && !ledger.global.contains(topic) {
                self.pool.unsubscribe_host(host_id, topic);
            }
        }
        for topic in subscribe {
            if topics.insert(topic.clone()) && !ledger.global.contains(topic) {
                self.pool.subscribe_host(host_id, topic);
            }
        }
        let now_empty = topics.is_empty();
        if now_empty {
            ledger.extra.remove(host);
        }
    }

    /// Snapshot of one sender's extra topics.
    pub fn extra_topic_subscriptions(&self, host: &str) -> BTreeSet<String> {
        self.ledger.lock().extra.get(host).cloned().unwrap_or_default()
    }

    /// Drop all extra topics of one sender, unsubscribing where needed.
    pub fn remove_extra_topic_subscriptions(&self, host: &str) {
        let ledger = &mut *self.ledger.lock();
        if let Some(topics) = ledger.extra.remove(host) {
            let host_id = Md5Hash::new(host);
            for topic in &topics {
                if !ledger.global.contains(topic) {
                    self.pool.unsubscribe_host(host_id, topic);
                }
            }
        }
    }

    /// Drop the extra topics of every sender.
    pub fn remove_all_extra_topic_subscriptions(&self) {
        let ledger = &mut *self.ledger.lock();
        let extra = std::mem::take(&mut ledger.extra);
        for (host, topics) in extra {
            let host_id = Md5Hash::new(&host);
            for topic in &topics {
                if !ledger.global.contains(topic) {
                    self.pool.unsubscribe_host(host_id, topic);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orphan_listener() -> CmdpListener {
        // A ChirpRef whose manager is gone degrades every operation to a
        // ledger-only change, which is exactly what these tests need.
        let chirp = {
            let manager = crate::chirp::Manager::with_port(
                std::net::Ipv4Addr::LOCALHOST,
                std::net::Ipv4Addr::UNSPECIFIED,
                "ledger_test",
                "listener",
                45999,
            )
            .expect("manager");
            manager.handle()
        };
        CmdpListener::new(chirp, |_| {})
    }

    #[test]
    fn global_topic_bookkeeping() {
        let listener = orphan_listener();
        listener.subscribe_topic("LOG/WARNING");
        listener.subscribe_topic("LOG/WARNING");
        listener.subscribe_topic("STAT/RATE");
        assert_eq!(
            listener.topic_subscriptions(),
            BTreeSet::from(["LOG/WARNING".to_owned(), "STAT/RATE".to_owned()])
        );

        listener.unsubscribe_topic("LOG/WARNING");
        assert_eq!(listener.topic_subscriptions(), BTreeSet::from(["STAT/RATE".to_owned()]));
    }

    #[test]
    fn extra_topic_bookkeeping() {
        let listener = orphan_listener();
        listener.subscribe_extra_topic("Dummy.s1", "LOG/TRACE");
        assert_eq!(
            listener.extra_topic_subscriptions("Dummy.s1"),
            BTreeSet::from(["LOG/TRACE".to_owned()])
        );
        assert!(listener.extra_topic_subscriptions("Dummy.s2").is_empty());

        listener.remove_extra_topic_subscriptions("Dummy.s1");
        assert!(listener.extra_topic_subscriptions("Dummy.s1").is_empty());
    }

    #[test]
    fn multiscribe_batches_apply_in_order() {
        let listener = orphan_listener();
        listener.multiscribe_topics(
            &[],
            &["LOG/INFO".to_owned(), "LOG/WARNING".to_owned()],
        );
        listener.multiscribe_topics(&["LOG/INFO".to_owned()], &["STAT/X".to_owned()]);
        assert_eq!(
            listener.topic_subscriptions(),
            BTreeSet::from(["LOG/WARNING".to_owned(), "STAT/X".to_owned()])
        );
    }
}
