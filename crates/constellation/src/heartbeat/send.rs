// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The heartbeat emitter thread.
//!
//! Publishes a CHP beacon every interval and an out-of-band "extrasystole"
//! immediately when the FSM changes state, so peers learn of transitions
//! without waiting out the interval. The thread also pumps the publishing
//! socket so fresh subscriptions take effect within one 50 ms tick.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::heartbeat::{DEFAULT_INTERVAL, MIN_INTERVAL};
use crate::message::chp::{ChpMessage, FLAG_EXTRASYSTOLE};
use crate::protocol::State;
use crate::transport::PubSocket;

/// Provider of the current FSM state.
pub type StateProvider = Arc<dyn Fn() -> State + Send + Sync>;

/// Provider of the current status line, if any.
pub type StatusProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

struct SendShared {
    socket: Mutex<PubSocket>,
    sender_name: String,
    interval_ms: AtomicU64,
    state: StateProvider,
    status: StatusProvider,
    stop: AtomicBool,
}

/// Periodic CHP beacon publisher.
pub struct HeartbeatSend {
    shared: Arc<SendShared>,
    wake_tx: Sender<()>,
    port: u16,
    thread: Option<JoinHandle<()>>,
}

impl HeartbeatSend {
    /// Bind the publishing socket and start the emitter thread.
    pub fn new(
        sender_name: impl Into<String>,
        state: StateProvider,
        status: StatusProvider,
    ) -> std::io::Result<Self> {
        let socket = PubSocket::bind()?;
        let port = socket.port();
        let shared = Arc::new(SendShared {
            socket: Mutex::new(socket),
            sender_name: sender_name.into(),
            interval_ms: AtomicU64::new(DEFAULT_INTERVAL.as_millis() as u64),
            state,
            status,
            stop: AtomicBool::new(false),
        });
        let (wake_tx, wake_rx) = bounded::<()>(16);
        let thread = {
            let shared = Arc::clone(&shared);
            Some(std::thread::spawn(move || emitter_loop(shared, wake_rx)))
        };
        log::info!("[chp] Emitting heartbeats on port {port}");
        Ok(HeartbeatSend { shared, wake_tx, port, thread })
    }

    /// Port of the publishing socket, for CHIRP registration.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Current beacon interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.shared.interval_ms.load(Ordering::Relaxed))
    }

    /// Change the beacon interval, clamped to the minimum.
    pub fn update_interval(&self, interval: Duration) {
        let clamped = interval.max(MIN_INTERVAL);
        self.shared.interval_ms.store(clamped.as_millis() as u64, Ordering::Relaxed);
        log::info!("[chp] Heartbeat interval updated to {clamped:?}");
    }

    /// Beat immediately, out of band.
    pub fn send_extrasystole(&self) {
        // A full channel already holds a pending wake, nothing lost
        let _ = self.wake_tx.try_send(());
    }
}

impl Drop for HeartbeatSend {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

fn emitter_loop(shared: Arc<SendShared>, wake_rx: Receiver<()>) {
    let tick = Duration::from_millis(50);
    let mut last_beat = Instant::now() - DEFAULT_INTERVAL;

    loop {
        if shared.stop.load(Ordering::Relaxed) {
            return;
        }

        // Process subscription control frames even between beats
        if let Err(e) = shared.socket.lock().pump(Duration::ZERO) {
            log::warn!("[chp] Publisher maintenance failed: {e}");
        }

        let interval = Duration::from_millis(shared.interval_ms.load(Ordering::Relaxed));
        match wake_rx.recv_timeout(tick) {
            Ok(()) => {
                beat(&shared, interval, FLAG_EXTRASYSTOLE);
                last_beat = Instant::now();
            }
            Err(RecvTimeoutError::Timeout) => {
                if last_beat.elapsed() >= interval {
                    beat(&shared, interval, 0);
                    last_beat = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn beat(shared: &SendShared, interval: Duration, flags: u8) {
    let state = (shared.state)();
    let mut msg =
        ChpMessage::new(shared.sender_name.clone(), state, interval).with_flags(flags);
    if let Some(status) = (shared.status)() {
        msg = msg.with_status(status);
    }
    log::trace!("[chp] Beating {state}{}", if flags & FLAG_EXTRASYSTOLE != 0 { " (extrasystole)" } else { "" });
    if let Err(e) = shared.socket.lock().publish(&msg.assemble()) {
        log::warn!("[chp] Failed to publish heartbeat: {e}");
    }
}
