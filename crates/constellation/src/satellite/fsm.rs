// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The satellite finite-state machine.
//!
//! State queries are cheap and callable from any thread; transitions are
//! serialized through the worker slot. A transition command moves the FSM
//! into the matching transitional state, spawns a worker that first joins
//! its predecessor and then executes the hook, and completes with an
//! internal transition to the steady target (or to ERROR when the hook
//! fails). `interrupt` cancels the RUN hook cooperatively; `failure` flips
//! straight to ERROR.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::SystemTime;

use parking_lot::Mutex;

use crate::protocol::cscp::{find_transition, State, Transition};

/// Cooperative cancellation for the RUN hook.
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::Relaxed);
    }
}

type StateCallback = Box<dyn Fn(State) + Send + Sync>;

/// The state machine core shared across satellite threads.
pub struct Fsm {
    /// Mirrors the state byte for wait-free reads.
    state: AtomicU8,
    /// Serializes transition decisions; holds the authoritative state.
    transition_lock: Mutex<()>,
    last_changed: Mutex<SystemTime>,
    callbacks: Mutex<Vec<(String, StateCallback)>>,
    /// The one transitional/RUN worker; replaced on every transition.
    worker: Mutex<Option<JoinHandle<()>>>,
    run_token: CancellationToken,
}

impl Default for Fsm {
    fn default() -> Self {
        Fsm::new()
    }
}

impl Fsm {
    pub fn new() -> Self {
        Fsm {
            state: AtomicU8::new(State::New as u8),
            transition_lock: Mutex::new(()),
            last_changed: Mutex::new(SystemTime::now()),
            callbacks: Mutex::new(Vec::new()),
            worker: Mutex::new(None),
            run_token: CancellationToken::new(),
        }
    }

    /// Current state, wait-free.
    pub fn state(&self) -> State {
        State::from_byte(self.state.load(Ordering::Acquire)).unwrap_or(State::Error)
    }

    /// Time of the last state change.
    pub fn last_changed(&self) -> SystemTime {
        *self.last_changed.lock()
    }

    /// The token the RUN hook must poll.
    pub fn run_token(&self) -> CancellationToken {
        self.run_token.clone()
    }

    /// Register a state-change callback under a name.
    pub fn register_state_callback(
        &self,
        name: impl Into<String>,
        callback: impl Fn(State) + Send + Sync + 'static,
    ) {
        self.callbacks.lock().push((name.into(), Box::new(callback)));
    }

    /// Remove a state-change callback by name.
    pub fn unregister_state_callback(&self, name: &str) {
        self.callbacks.lock().retain(|(n, _)| n != name);
    }

    /// Attempt a transition; on success the state is already switched and
    /// the previous worker handle (to be joined by the new worker) is
    /// returned along with the state that was left.
    ///
    /// `interrupt` and `stop` cancel the run token before returning so the
    /// RUN hook starts winding down immediately.
    pub(crate) fn begin(
        &self,
        transition: Transition,
    ) -> Result<(State, Option<JoinHandle<()>>), State> {
        let _guard = self.transition_lock.lock();
        let current = self.state();
        let Some(target) = find_transition(current, transition) else {
            return Err(current);
        };
        if matches!(transition, Transition::Stop | Transition::Interrupt | Transition::Failure) {
            self.run_token.cancel();
        } else if matches!(transition, Transition::Start) {
            self.run_token.reset();
        }
        self.switch(target);
        Ok((current, self.worker.lock().take()))
    }

    /// Store the worker executing the transition begun with `begin`.
    pub(crate) fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock() = Some(handle);
    }

    /// Complete a transitional state from the worker. Ignored when an
    /// interrupt or failure changed the state underneath the hook.
    pub(crate) fn complete(&self, transition: Transition) -> Option<State> {
        let _guard = self.transition_lock.lock();
        let current = self.state();
        let target = find_transition(current, transition)?;
        self.switch(target);
        Some(target)
    }

    /// Wait for the current worker to finish (used on shutdown).
    pub(crate) fn join_worker(&self) {
        self.run_token.cancel();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    fn switch(&self, target: State) {
        self.state.store(target as u8, Ordering::Release);
        *self.last_changed.lock() = SystemTime::now();
        log::info!("[fsm] State changed to {target}");
        for (_, callback) in self.callbacks.lock().iter() {
            callback(target);
        }
    }
}
