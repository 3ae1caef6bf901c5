// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The heartbeat manager: beacon emitter plus peer liveness tracking.
//!
//! Incoming beacons update a per-peer record of `{last_seen, interval,
//! state}`. A watchdog declares a peer likely dead after [`LIVES`] declared
//! intervals without a beacon and, after one further interval of grace,
//! forgets the host's discovered services via CHIRP, which fires DEAD
//! callbacks process-wide. A beacon reporting ERROR or SAFE raises a local
//! interrupt through the injected callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::chirp::ChirpRef;
use crate::heartbeat::send::{HeartbeatSend, StateProvider, StatusProvider};
use crate::heartbeat::LIVES;
use crate::message::{ChpMessage, Md5Hash};
use crate::pools::{PoolCallbacks, SubscriberPool};
use crate::protocol::{ServiceIdentifier, State};

/// Callback raising a local interrupt with a reason.
pub type InterruptCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Liveness record of one remote satellite.
#[derive(Debug, Clone)]
pub struct PeerHealth {
    pub state: State,
    pub interval: Duration,
    pub last_seen: Instant,
    pub status: Option<String>,
    /// Set once the watchdog has logged the missed-beacon warning.
    pub likely_dead: bool,
}

struct Tracker {
    peers: DashMap<String, PeerHealth>,
    chirp: ChirpRef,
    interrupt: InterruptCallback,
}

impl Tracker {
    fn ingest(&self, msg: ChpMessage) {
        let sender = msg.header().sender().to_owned();
        let state = msg.state();
        log::trace!("[chp] Beacon from {sender}: {state}");

        let previous = self.peers.insert(
            sender.clone(),
            PeerHealth {
                state,
                interval: msg.interval(),
                last_seen: Instant::now(),
                status: msg.status().map(str::to_owned),
                likely_dead: false,
            },
        );

        // Interrupt on a fresh failure observation, not on every beacon
        let newly_failed =
            state.indicates_failure() && previous.map(|p| !p.state.indicates_failure()).unwrap_or(true);
        if newly_failed {
            let reason = format!("{sender} reports state {state}");
            log::warn!("[chp] {reason}, raising interrupt");
            (self.interrupt)(&reason);
        }
    }

    /// Forget a peer that departed in an orderly fashion.
    fn remove(&self, sender_host: Md5Hash) {
        self.peers.retain(|name, _| Md5Hash::new(name) != sender_host);
    }

    fn watch(&self) {
        let mut dead: Vec<String> = Vec::new();
        for mut entry in self.peers.iter_mut() {
            let silent_for = entry.last_seen.elapsed();
            let interval = entry.interval;
            if !entry.likely_dead && silent_for > interval * LIVES {
                log::warn!(
                    "[chp] {} missed {LIVES} heartbeats (interval {interval:?}), likely dead",
                    entry.key()
                );
                entry.likely_dead = true;
            } else if entry.likely_dead && silent_for > interval * (LIVES + 1) {
                dead.push(entry.key().clone());
            }
        }
        for name in dead {
            log::warn!("[chp] Declaring {name} dead, dropping its services");
            self.peers.remove(&name);
            self.chirp.forget_discovered_services_of(Md5Hash::new(&name));
        }
    }
}

/// Emitter, subscriber pool and watchdog in one unit, owned by a satellite.
pub struct HeartbeatManager {
    send: HeartbeatSend,
    pool: Arc<SubscriberPool<ChpMessage>>,
    tracker: Arc<Tracker>,
    stop: Arc<AtomicBool>,
    watchdog: Option<JoinHandle<()>>,
}

impl HeartbeatManager {
    /// Build and start heartbeating for `sender_name`.
    ///
    /// The emitter port is registered as the `HEARTBEAT` service. The
    /// `interrupt` callback is invoked from pool and watchdog threads and
    /// must not block.
    pub fn new(
        sender_name: impl Into<String>,
        chirp: ChirpRef,
        state: StateProvider,
        status: StatusProvider,
        interrupt: InterruptCallback,
    ) -> std::io::Result<Self> {
        let sender_name = sender_name.into();
        let send = HeartbeatSend::new(sender_name.clone(), state, status)?;
        chirp.register_service(ServiceIdentifier::Heartbeat, send.port());

        let tracker = Arc::new(Tracker {
            peers: DashMap::new(),
            chirp: chirp.clone(),
            interrupt,
        });

        let pool = {
            let on_message = Arc::clone(&tracker);
            let on_disposed = Arc::clone(&tracker);
            let on_departed = Arc::clone(&tracker);
            Arc::new(SubscriberPool::new(
                "chp",
                ServiceIdentifier::Heartbeat,
                chirp,
                PoolCallbacks {
                    message: Box::new(move |msg: ChpMessage| on_message.ingest(msg)),
                    should_connect: Box::new(|_| true),
                    // Everything a heartbeat publisher sends is wanted
                    host_connected: Box::new(|pool, service| {
                        pool.subscribe_host(service.host_id, "");
                    }),
                    host_disconnected: Box::new(move |service| {
                        on_departed.remove(service.host_id);
                    }),
                    host_disposed: Box::new(move |service| {
                        on_disposed.remove(service.host_id);
                    }),
                },
            ))
        };
        pool.start_pool();

        let stop = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let tracker = Arc::clone(&tracker);
            let stop = Arc::clone(&stop);
            Some(std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    tracker.watch();
                    std::thread::sleep(Duration::from_millis(100));
                }
            }))
        };

        Ok(HeartbeatManager { send, pool, tracker, stop, watchdog })
    }

    /// Port of the beacon publisher.
    pub fn port(&self) -> u16 {
        self.send.port()
    }

    /// Change the beacon interval (driven by `_heartbeat_interval`).
    pub fn update_interval(&self, interval: Duration) {
        self.send.update_interval(interval);
    }

    /// Beat immediately; wired into the FSM's state-change callbacks.
    pub fn send_extrasystole(&self) {
        self.send.send_extrasystole();
    }

    /// Snapshot of a remote peer's health record.
    pub fn peer(&self, sender: &str) -> Option<PeerHealth> {
        self.tracker.peers.get(sender).map(|entry| entry.value().clone())
    }

    /// Names of all tracked peers.
    pub fn peers(&self) -> Vec<String> {
        self.tracker.peers.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Drop for HeartbeatManager {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.watchdog.take() {
            let _ = handle.join();
        }
        self.pool.stop_pool();
    }
}
