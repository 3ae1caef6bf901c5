// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The generic pool implementation.
//!
//! One `mio::Poll` multiplexes every pool socket; the loop wakes at least
//! every 50 ms, drains whatever is readable and dispatches decoded messages
//! with the socket map unlocked. Peers are added and removed by the CHIRP
//! discover callback, which runs on the manager's dispatch threads and
//! registers sockets through a cloned poll registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use mio::{Events, Interest, Poll, Registry, Token};
use parking_lot::Mutex;

use crate::chirp::{ChirpRef, DiscoveredService, ServiceStatus, UserData};
use crate::message::{DecodeError, Md5Hash};
use crate::protocol::ServiceIdentifier;
use crate::transport::{Multipart, NetworkError, PullSocket, SubSocket, POLL_INTERVAL};

/// A fatal pool failure, re-raised from `check_exception`.
#[derive(Debug)]
pub enum PoolError {
    Network(NetworkError),
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::Network(e) => write!(f, "Pool failed: {e}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// A client socket a pool can manage.
pub trait PoolSocket: Send + Sized + 'static {
    fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self>;

    /// The mio stream for poll registration.
    fn source(&mut self) -> &mut mio::net::TcpStream;

    /// Read everything available.
    fn drain(&mut self) -> Result<Vec<Multipart>, NetworkError>;

    /// Push out queued control frames, if any.
    fn flush(&mut self) -> Result<(), NetworkError>;

    /// Topic subscription; a no-op for socket types without subscriptions.
    fn subscribe(&mut self, _topic: &str) -> Result<(), NetworkError> {
        Ok(())
    }

    /// Topic unsubscription; a no-op for socket types without subscriptions.
    fn unsubscribe(&mut self, _topic: &str) -> Result<(), NetworkError> {
        Ok(())
    }
}

impl PoolSocket for SubSocket {
    fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        SubSocket::connect(addr)
    }

    fn source(&mut self) -> &mut mio::net::TcpStream {
        SubSocket::source(self)
    }

    fn drain(&mut self) -> Result<Vec<Multipart>, NetworkError> {
        SubSocket::drain(self)
    }

    fn flush(&mut self) -> Result<(), NetworkError> {
        SubSocket::flush(self)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        SubSocket::subscribe(self, topic)
    }

    fn unsubscribe(&mut self, topic: &str) -> Result<(), NetworkError> {
        SubSocket::unsubscribe(self, topic)
    }
}

impl PoolSocket for PullSocket {
    fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        PullSocket::connect(addr)
    }

    fn source(&mut self) -> &mut mio::net::TcpStream {
        PullSocket::source(self)
    }

    fn drain(&mut self) -> Result<Vec<Multipart>, NetworkError> {
        PullSocket::drain(self)
    }

    fn flush(&mut self) -> Result<(), NetworkError> {
        PullSocket::flush(self)
    }
}

/// A message type a pool can decode.
pub trait PoolMessage: Send + Sized + 'static {
    fn disassemble(frames: &Multipart) -> Result<Self, DecodeError>;
}

impl PoolMessage for crate::message::ChpMessage {
    fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        crate::message::ChpMessage::disassemble(frames)
    }
}

impl PoolMessage for crate::message::CmdpMessage {
    fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        crate::message::CmdpMessage::disassemble(frames)
    }
}

impl PoolMessage for crate::message::CdtpMessage {
    fn disassemble(frames: &Multipart) -> Result<Self, DecodeError> {
        crate::message::CdtpMessage::disassemble(frames)
    }
}

/// Per-peer subscription operations, passed to lifecycle hooks.
///
/// Hooks receive this instead of the pool itself so they can adjust
/// subscriptions without creating an ownership cycle.
pub trait PoolSubscriber: Send + Sync {
    /// Subscribe every connected peer to `topic`.
    fn subscribe_all(&self, topic: &str);
    /// Unsubscribe every connected peer from `topic`.
    fn unsubscribe_all(&self, topic: &str);
    /// Subscribe one peer, identified by host id.
    fn subscribe_host(&self, host_id: Md5Hash, topic: &str);
    /// Unsubscribe one peer, identified by host id.
    fn unsubscribe_host(&self, host_id: Md5Hash, topic: &str);
}

/// The user-supplied behavior of a pool.
pub struct PoolCallbacks<M> {
    /// Receives every decoded message.
    pub message: Box<dyn Fn(M) + Send + Sync>,
    /// Filter deciding whether a discovered service gets a connection.
    pub should_connect: Box<dyn Fn(&DiscoveredService) -> bool + Send + Sync>,
    /// Fired after a peer's socket is connected and registered.
    pub host_connected: Box<dyn Fn(&dyn PoolSubscriber, &DiscoveredService) + Send + Sync>,
    /// Fired after a departed peer's socket is disconnected.
    pub host_disconnected: Box<dyn Fn(&DiscoveredService) + Send + Sync>,
    /// Fired after a dead peer's socket is forcibly dropped.
    pub host_disposed: Box<dyn Fn(&DiscoveredService) + Send + Sync>,
}

impl<M> PoolCallbacks<M> {
    /// Callbacks that connect to everything and only forward messages.
    pub fn message_only(message: impl Fn(M) + Send + Sync + 'static) -> Self {
        PoolCallbacks {
            message: Box::new(message),
            should_connect: Box::new(|_| true),
            host_connected: Box::new(|_, _| {}),
            host_disconnected: Box::new(|_| {}),
            host_disposed: Box::new(|_| {}),
        }
    }
}

struct PoolEntry<S> {
    service: DiscoveredService,
    socket: S,
    token: Token,
}

struct PoolShared<M: PoolMessage, S: PoolSocket> {
    label: &'static str,
    service: ServiceIdentifier,
    chirp: ChirpRef,
    callbacks: PoolCallbacks<M>,
    sockets: Mutex<HashMap<usize, PoolEntry<S>>>,
    registry: Mutex<Option<Registry>>,
    next_token: AtomicUsize,
    stop: AtomicBool,
    error: Mutex<Option<PoolError>>,
}

/// Context handed to the CHIRP discover callback.
struct ChirpContext<M: PoolMessage, S: PoolSocket> {
    pool: Weak<PoolShared<M, S>>,
}

/// Generic fan-in pool over one discovered service type.
pub struct BasePool<M: PoolMessage, S: PoolSocket> {
    shared: Arc<PoolShared<M, S>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

/// Pool over subscription-capable sockets.
pub type SubscriberPool<M> = BasePool<M, SubSocket>;

impl<M: PoolMessage, S: PoolSocket> BasePool<M, S> {
    /// Create a pool for `service`, not yet started.
    ///
    /// `label` shows up in log lines, conventionally the protocol name.
    pub fn new(
        label: &'static str,
        service: ServiceIdentifier,
        chirp: ChirpRef,
        callbacks: PoolCallbacks<M>,
    ) -> Self {
        BasePool {
            shared: Arc::new(PoolShared {
                label,
                service,
                chirp,
                callbacks,
                sockets: Mutex::new(HashMap::new()),
                registry: Mutex::new(None),
                next_token: AtomicUsize::new(0),
                stop: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the poll loop and hook into CHIRP discovery.
    ///
    /// Peers already discovered are replayed through the connect path
    /// before a fresh `REQUEST` for the service is broadcast.
    pub fn start_pool(&self) {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return;
        }
        self.shared.stop.store(false, Ordering::Relaxed);

        let poll = match Poll::new() {
            Ok(poll) => poll,
            Err(e) => {
                *self.shared.error.lock() =
                    Some(PoolError::Network(NetworkError::Io(e)));
                return;
            }
        };
        match poll.registry().try_clone() {
            Ok(registry) => *self.shared.registry.lock() = Some(registry),
            Err(e) => {
                *self.shared.error.lock() = Some(PoolError::Network(NetworkError::Io(e)));
                return;
            }
        }

        let context: UserData =
            Arc::new(ChirpContext { pool: Arc::downgrade(&self.shared) });
        self.shared.chirp.register_discover_callback(
            chirp_callback::<M, S>,
            self.shared.service,
            context,
        );

        // Catch up on peers discovered before this pool existed
        for service in self.shared.chirp.discovered_services_of(self.shared.service) {
            self.shared.handle_event(service, ServiceStatus::Discovered);
        }

        let shared = Arc::clone(&self.shared);
        *thread = Some(std::thread::spawn(move || pool_loop(shared, poll)));

        self.shared.chirp.send_request(self.shared.service);
    }

    /// Unhook from CHIRP, stop the loop and disconnect every peer.
    pub fn stop_pool(&self) {
        self.shared.chirp.unregister_discover_callback(chirp_callback::<M, S>, self.shared.service);
        self.shared.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        *self.shared.registry.lock() = None;
        self.shared.sockets.lock().clear();
    }

    /// Re-raise a failure captured by the poll loop.
    pub fn check_exception(&self) -> Result<(), PoolError> {
        match self.shared.error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Number of currently connected peers.
    pub fn connected_count(&self) -> usize {
        self.shared.sockets.lock().len()
    }

    /// Hosts currently connected, by host id.
    pub fn connected_hosts(&self) -> Vec<Md5Hash> {
        self.shared.sockets.lock().values().map(|e| e.service.host_id).collect()
    }

    /// Subscription operations handle (also passed to hooks).
    pub fn subscriber(&self) -> &dyn PoolSubscriber {
        self.shared.as_ref()
    }
}

impl<M: PoolMessage> BasePool<M, SubSocket> {
    /// Subscribe every connected peer to `topic`.
    pub fn subscribe(&self, topic: &str) {
        self.shared.subscribe_all(topic);
    }

    /// Unsubscribe every connected peer from `topic`.
    pub fn unsubscribe(&self, topic: &str) {
        self.shared.unsubscribe_all(topic);
    }

    /// Subscribe one peer to `topic`.
    pub fn subscribe_host(&self, host_id: Md5Hash, topic: &str) {
        self.shared.subscribe_host(host_id, topic);
    }

    /// Unsubscribe one peer from `topic`.
    pub fn unsubscribe_host(&self, host_id: Md5Hash, topic: &str) {
        self.shared.unsubscribe_host(host_id, topic);
    }
}

impl<M: PoolMessage, S: PoolSocket> Drop for BasePool<M, S> {
    fn drop(&mut self) {
        self.stop_pool();
    }
}

impl<M: PoolMessage, S: PoolSocket> PoolSubscriber for PoolShared<M, S> {
    fn subscribe_all(&self, topic: &str) {
        for entry in self.sockets.lock().values_mut() {
            if let Err(e) = entry.socket.subscribe(topic) {
                log::debug!("[{}] Subscribe to {topic:?} failed: {e}", self.label);
            }
        }
    }

    fn unsubscribe_all(&self, topic: &str) {
        for entry in self.sockets.lock().values_mut() {
            if let Err(e) = entry.socket.unsubscribe(topic) {
                log::debug!("[{}] Unsubscribe from {topic:?} failed: {e}", self.label);
            }
        }
    }

    fn subscribe_host(&self, host_id: Md5Hash, topic: &str) {
        for entry in self.sockets.lock().values_mut() {
            if entry.service.host_id == host_id {
                if let Err(e) = entry.socket.subscribe(topic) {
                    log::debug!("[{}] Subscribe to {topic:?} failed: {e}", self.label);
                }
            }
        }
    }

    fn unsubscribe_host(&self, host_id: Md5Hash, topic: &str) {
        for entry in self.sockets.lock().values_mut() {
            if entry.service.host_id == host_id {
                if let Err(e) = entry.socket.unsubscribe(topic) {
                    log::debug!("[{}] Unsubscribe from {topic:?} failed: {e}", self.label);
                }
            }
        }
    }
}

impl<M: PoolMessage, S: PoolSocket> PoolShared<M, S> {
    /// React to a CHIRP lifecycle event for our service type.
    fn handle_event(&self, service: DiscoveredService, status: ServiceStatus) {
        match status {
            ServiceStatus::Discovered => {
                if !(self.callbacks.should_connect)(&service) {
                    log::trace!(
                        "[{}] Not connecting to {} (filtered)",
                        self.label,
                        service.to_uri()
                    );
                    return;
                }
                self.connect(service);
            }
            ServiceStatus::Departed => {
                if self.disconnect(&service) {
                    (self.callbacks.host_disconnected)(&service);
                }
            }
            ServiceStatus::Dead => {
                if self.disconnect(&service) {
                    (self.callbacks.host_disposed)(&service);
                }
            }
        }
    }

    fn connect(&self, service: DiscoveredService) {
        let mut socket = match S::connect(service.socket_addr()) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("[{}] Failed to connect to {}: {e}", self.label, service.to_uri());
                return;
            }
        };

        {
            let mut sockets = self.sockets.lock();
            // A second OFFER for the same logical service is a duplicate
            if sockets.values().any(|entry| entry.service == service) {
                return;
            }
            let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
            if let Some(registry) = self.registry.lock().as_ref() {
                if let Err(e) = registry.register(
                    socket.source(),
                    token,
                    Interest::READABLE | Interest::WRITABLE,
                ) {
                    log::warn!("[{}] Failed to register socket: {e}", self.label);
                    return;
                }
            }
            log::debug!("[{}] Connecting to {}", self.label, service.to_uri());
            sockets.insert(token.0, PoolEntry { service, socket, token });
        }

        // Hook runs with the socket map unlocked
        (self.callbacks.host_connected)(self, &service);
    }

    fn disconnect(&self, service: &DiscoveredService) -> bool {
        let removed = {
            let mut sockets = self.sockets.lock();
            let key = sockets
                .iter()
                .find(|(_, entry)| entry.service == *service)
                .map(|(key, _)| *key);
            key.and_then(|k| sockets.remove(&k))
        };
        match removed {
            Some(mut entry) => {
                if let Some(registry) = self.registry.lock().as_ref() {
                    let _ = registry.deregister(entry.socket.source());
                }
                log::debug!("[{}] Disconnected from {}", self.label, service.to_uri());
                true
            }
            None => false,
        }
    }
}

/// Monomorphized CHIRP callback trampoline for one pool type.
fn chirp_callback<M: PoolMessage, S: PoolSocket>(
    service: DiscoveredService,
    status: ServiceStatus,
    user_data: &UserData,
) {
    let Some(context) = user_data.downcast_ref::<ChirpContext<M, S>>() else {
        return;
    };
    if let Some(pool) = context.pool.upgrade() {
        pool.handle_event(service, status);
    }
}

/// The poll loop: wake on readiness or every 50 ms, drain, dispatch.
fn pool_loop<M: PoolMessage, S: PoolSocket>(shared: Arc<PoolShared<M, S>>, mut poll: Poll) {
    let mut events = Events::with_capacity(64);
    while !shared.stop.load(Ordering::Relaxed) {
        if let Err(e) = poll.poll(&mut events, Some(POLL_INTERVAL)) {
            if e.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            *shared.error.lock() = Some(PoolError::Network(NetworkError::Io(e)));
            return;
        }

        // Drain every socket on every wake; readiness events are only the
        // accelerator, the 50 ms tick is the correctness backstop.
        let mut received: Vec<(DiscoveredService, Multipart)> = Vec::new();
        let mut lost: Vec<DiscoveredService> = Vec::new();
        {
            let mut sockets = shared.sockets.lock();
            for entry in sockets.values_mut() {
                if let Err(e) = entry.socket.flush() {
                    log::debug!("[{}] Flush to {} failed: {e}", shared.label, entry.service.to_uri());
                }
                match entry.socket.drain() {
                    Ok(units) => {
                        received.extend(units.into_iter().map(|u| (entry.service, u)))
                    }
                    Err(NetworkError::Closed) => lost.push(entry.service),
                    Err(e) => {
                        log::warn!(
                            "[{}] Receive from {} failed: {e}",
                            shared.label,
                            entry.service.to_uri()
                        );
                        lost.push(entry.service);
                    }
                }
            }
        }

        for service in lost {
            if shared.disconnect(&service) {
                (shared.callbacks.host_disconnected)(&service);
            }
        }

        for (service, frames) in received {
            match M::disassemble(&frames) {
                Ok(message) => (shared.callbacks.message)(message),
                Err(e) => {
                    // Survivable: drop the message, keep the pool running
                    log::warn!("[{}] Undecodable message from {}: {e}", shared.label, service.to_uri());
                }
            }
        }
    }
}
