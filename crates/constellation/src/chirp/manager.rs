// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CHIRP manager: service registry, discovery and callbacks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering as MemOrdering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::chirp::socket::{BroadcastRecv, BroadcastSend};
use crate::message::{ChirpMessage, ChirpMessageType, Md5Hash};
use crate::protocol::{ServiceIdentifier, CHIRP_PORT};

/// Receive wake interval; the loop notices a stop request within this.
const RECV_INTERVAL: Duration = Duration::from_millis(50);

/// A service offered by this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegisteredService {
    /// Sort order: identifier first, then port.
    pub identifier: ServiceIdentifier,
    pub port: u16,
}

/// A service discovered on a remote host.
///
/// Ordering and equality ignore the address: the same host may reach the
/// network through several interfaces and still counts as one service.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredService {
    pub address: Ipv4Addr,
    pub host_id: Md5Hash,
    pub identifier: ServiceIdentifier,
    pub port: u16,
}

impl DiscoveredService {
    /// Endpoint URI for logs and tools.
    pub fn to_uri(&self) -> String {
        format!("tcp://{}:{}", self.address, self.port)
    }

    /// Connectable socket address of the service.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.address, self.port))
    }

    fn sort_key(&self) -> (Md5Hash, ServiceIdentifier, u16) {
        (self.host_id, self.identifier, self.port)
    }
}

impl PartialEq for DiscoveredService {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for DiscoveredService {}

impl PartialOrd for DiscoveredService {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DiscoveredService {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// Lifecycle stage reported to discover callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// The service is newly discovered.
    Discovered,
    /// The service departed orderly.
    Departed,
    /// The service is considered dead without a departure.
    Dead,
}

/// Arbitrary state passed back to a discover callback.
pub type UserData = Arc<dyn std::any::Any + Send + Sync>;

/// Callback invoked on service lifecycle events.
///
/// Callbacks run on short-lived dispatch threads; the manager joins them
/// before processing the next datagram, so a blocking callback starves
/// further discovery. Offload long work to another thread.
pub type DiscoverCallback = fn(DiscoveredService, ServiceStatus, &UserData);

struct CallbackEntry {
    callback: DiscoverCallback,
    user_data: UserData,
}

/// Map key: callback address first, then service identifier. User data is
/// deliberately not part of the identity.
type CallbackKey = (usize, ServiceIdentifier);

struct ManagerInner {
    sender: BroadcastSend,
    receiver: BroadcastRecv,
    group_id: Md5Hash,
    host_id: Md5Hash,
    registered: Mutex<BTreeSet<RegisteredService>>,
    discovered: Mutex<BTreeSet<DiscoveredService>>,
    callbacks: Mutex<BTreeMap<CallbackKey, CallbackEntry>>,
    stop: AtomicBool,
}

/// Manager for CHIRP broadcasting and receiving.
pub struct Manager {
    inner: Arc<ManagerInner>,
    thread: Option<JoinHandle<()>>,
}

/// Process-wide default manager handle, set via [`Manager::set_as_default`].
static DEFAULT_INSTANCE: RwLock<Option<ChirpRef>> = RwLock::new(None);

impl Manager {
    /// Create a manager for `group_name`, announcing as `host_name`.
    ///
    /// `brd_address` is the target of outgoing broadcasts, `any_address`
    /// the bind address for incoming ones.
    pub fn new(
        brd_address: Ipv4Addr,
        any_address: Ipv4Addr,
        group_name: &str,
        host_name: &str,
    ) -> std::io::Result<Self> {
        Manager::with_port(brd_address, any_address, group_name, host_name, CHIRP_PORT)
    }

    /// Create a manager on a non-standard port (tests use this to isolate
    /// themselves from live constellations).
    pub fn with_port(
        brd_address: Ipv4Addr,
        any_address: Ipv4Addr,
        group_name: &str,
        host_name: &str,
        port: u16,
    ) -> std::io::Result<Self> {
        let group_id = Md5Hash::new(group_name);
        let host_id = Md5Hash::new(host_name);
        log::debug!("[chirp] Host ID for {host_name} is {host_id}");
        log::debug!("[chirp] Group ID for {group_name} is {group_id}");
        Ok(Manager {
            inner: Arc::new(ManagerInner {
                sender: BroadcastSend::with_port(brd_address, port)?,
                receiver: BroadcastRecv::with_port(any_address, port)?,
                group_id,
                host_id,
                registered: Mutex::new(BTreeSet::new()),
                discovered: Mutex::new(BTreeSet::new()),
                callbacks: Mutex::new(BTreeMap::new()),
                stop: AtomicBool::new(false),
            }),
            thread: None,
        })
    }

    /// Start the background receive loop.
    pub fn start(&mut self) {
        if self.thread.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.thread = Some(std::thread::spawn(move || main_loop(weak)));
    }

    /// Publish this manager as the process-wide default instance.
    pub fn set_as_default(&self) {
        *DEFAULT_INSTANCE.write() = Some(self.handle());
    }

    /// The process-wide default manager, if one was set.
    pub fn default_ref() -> Option<ChirpRef> {
        DEFAULT_INSTANCE.read().clone()
    }

    /// Cheap handle for injection into pools and satellites.
    pub fn handle(&self) -> ChirpRef {
        ChirpRef { inner: Arc::downgrade(&self.inner) }
    }

    pub fn group_id(&self) -> Md5Hash {
        self.inner.group_id
    }

    pub fn host_id(&self) -> Md5Hash {
        self.inner.host_id
    }

    /// Register an offered service; broadcasts an `OFFER` when new.
    ///
    /// Returns whether the service was newly registered.
    pub fn register_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        self.inner.register_service(identifier, port)
    }

    /// Unregister an offered service; broadcasts a `DEPART` when present.
    ///
    /// Returns whether the service had been registered.
    pub fn unregister_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        self.inner.unregister_service(identifier, port)
    }

    /// Broadcast a `DEPART` for every registered service and clear the
    /// registry.
    pub fn unregister_services(&self) {
        self.inner.unregister_services();
    }

    /// Snapshot of the currently registered services.
    pub fn registered_services(&self) -> Vec<RegisteredService> {
        self.inner.registered.lock().iter().copied().collect()
    }

    /// Register a discover callback for one service identifier.
    ///
    /// Returns false when the (callback, identifier) pair is already
    /// registered; user data does not distinguish entries.
    pub fn register_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
        user_data: UserData,
    ) -> bool {
        self.inner.register_discover_callback(callback, identifier, user_data)
    }

    /// Remove a discover callback entry, irrespective of its user data.
    pub fn unregister_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
    ) -> bool {
        self.inner.unregister_discover_callback(callback, identifier)
    }

    /// Remove every discover callback.
    pub fn unregister_discover_callbacks(&self) {
        self.inner.callbacks.lock().clear();
    }

    /// Snapshot of all discovered services.
    pub fn discovered_services(&self) -> Vec<DiscoveredService> {
        self.inner.discovered.lock().iter().copied().collect()
    }

    /// Snapshot of the discovered services with a given identifier.
    pub fn discovered_services_of(&self, identifier: ServiceIdentifier) -> Vec<DiscoveredService> {
        self.inner
            .discovered
            .lock()
            .iter()
            .filter(|s| s.identifier == identifier)
            .copied()
            .collect()
    }

    /// Drop one discovered service, firing DEAD callbacks.
    pub fn forget_discovered_service(&self, identifier: ServiceIdentifier, host_id: Md5Hash) {
        self.inner.forget_discovered_service(identifier, host_id);
    }

    /// Drop all discovered services of one host, firing DEAD callbacks.
    pub fn forget_discovered_services_of(&self, host_id: Md5Hash) {
        self.inner.forget_discovered_services_of(host_id);
    }

    /// Drop every discovered service without callbacks.
    pub fn forget_discovered_services(&self) {
        self.inner.discovered.lock().clear();
    }

    /// Broadcast a `REQUEST` for a service identifier; peers answer with
    /// their `OFFER`s.
    pub fn send_request(&self, identifier: ServiceIdentifier) {
        self.inner.send_message(ChirpMessageType::Request, identifier, 0);
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.inner.stop.store(true, MemOrdering::Relaxed);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        // Announce departure of everything still registered
        self.inner.unregister_services();
    }
}

/// Weak handle to a [`Manager`], safe to hold across its shutdown.
///
/// Satellites, pools and the heartbeat manager keep one of these instead of
/// a reference, which breaks the discovery/liveness ownership cycle. Every
/// operation degrades to a no-op once the manager is gone.
#[derive(Clone)]
pub struct ChirpRef {
    inner: Weak<ManagerInner>,
}

impl ChirpRef {
    pub fn register_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        self.inner.upgrade().map(|m| m.register_service(identifier, port)).unwrap_or(false)
    }

    pub fn unregister_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        self.inner.upgrade().map(|m| m.unregister_service(identifier, port)).unwrap_or(false)
    }

    pub fn register_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
        user_data: UserData,
    ) -> bool {
        self.inner
            .upgrade()
            .map(|m| m.register_discover_callback(callback, identifier, user_data))
            .unwrap_or(false)
    }

    pub fn unregister_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
    ) -> bool {
        self.inner
            .upgrade()
            .map(|m| m.unregister_discover_callback(callback, identifier))
            .unwrap_or(false)
    }

    pub fn send_request(&self, identifier: ServiceIdentifier) {
        if let Some(manager) = self.inner.upgrade() {
            manager.send_message(ChirpMessageType::Request, identifier, 0);
        }
    }

    pub fn discovered_services_of(&self, identifier: ServiceIdentifier) -> Vec<DiscoveredService> {
        self.inner
            .upgrade()
            .map(|m| {
                m.discovered
                    .lock()
                    .iter()
                    .filter(|s| s.identifier == identifier)
                    .copied()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn forget_discovered_service(&self, identifier: ServiceIdentifier, host_id: Md5Hash) {
        if let Some(manager) = self.inner.upgrade() {
            manager.forget_discovered_service(identifier, host_id);
        }
    }

    pub fn forget_discovered_services_of(&self, host_id: Md5Hash) {
        if let Some(manager) = self.inner.upgrade() {
            manager.forget_discovered_services_of(host_id);
        }
    }

    pub fn host_id(&self) -> Option<Md5Hash> {
        self.inner.upgrade().map(|m| m.host_id)
    }
}

impl ManagerInner {
    fn register_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        let service = RegisteredService { identifier, port };
        let inserted = self.registered.lock().insert(service);
        if inserted {
            self.send_message(ChirpMessageType::Offer, identifier, port);
        }
        inserted
    }

    fn unregister_service(&self, identifier: ServiceIdentifier, port: u16) -> bool {
        let service = RegisteredService { identifier, port };
        let removed = self.registered.lock().remove(&service);
        if removed {
            self.send_message(ChirpMessageType::Depart, identifier, port);
        }
        removed
    }

    fn unregister_services(&self) {
        let mut registered = self.registered.lock();
        for service in registered.iter() {
            self.send_message(ChirpMessageType::Depart, service.identifier, service.port);
        }
        registered.clear();
    }

    fn register_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
        user_data: UserData,
    ) -> bool {
        let key = (callback as usize, identifier);
        let mut callbacks = self.callbacks.lock();
        if callbacks.contains_key(&key) {
            return false;
        }
        callbacks.insert(key, CallbackEntry { callback, user_data });
        true
    }

    fn unregister_discover_callback(
        &self,
        callback: DiscoverCallback,
        identifier: ServiceIdentifier,
    ) -> bool {
        self.callbacks.lock().remove(&(callback as usize, identifier)).is_some()
    }

    fn forget_discovered_service(&self, identifier: ServiceIdentifier, host_id: Md5Hash) {
        let mut forgotten = Vec::new();
        {
            let mut discovered = self.discovered.lock();
            discovered.retain(|service| {
                if service.host_id == host_id && service.identifier == identifier {
                    forgotten.push(*service);
                    false
                } else {
                    true
                }
            });
        }
        for service in forgotten {
            log::debug!(
                "[chirp] Dropping discovered {} service of host {host_id}",
                service.identifier
            );
            self.call_discover_callbacks(&service, ServiceStatus::Dead);
        }
    }

    fn forget_discovered_services_of(&self, host_id: Md5Hash) {
        let mut forgotten = Vec::new();
        {
            let mut discovered = self.discovered.lock();
            discovered.retain(|service| {
                if service.host_id == host_id {
                    forgotten.push(*service);
                    false
                } else {
                    true
                }
            });
        }
        log::debug!("[chirp] Dropped {} discovered services of host {host_id}", forgotten.len());
        for service in forgotten {
            self.call_discover_callbacks(&service, ServiceStatus::Dead);
        }
    }

    fn send_message(&self, msg_type: ChirpMessageType, identifier: ServiceIdentifier, port: u16) {
        log::debug!("[chirp] Sending {msg_type} for {identifier} service on port {port}");
        let msg = ChirpMessage::new(msg_type, self.group_id, self.host_id, identifier, port);
        if let Err(e) = self.sender.send(&msg.assemble()) {
            log::warn!("[chirp] Failed to broadcast {msg_type}: {e}");
        }
    }

    /// Dispatch a lifecycle event to every matching callback.
    ///
    /// Callbacks run on their own threads but the scope joins them before
    /// returning, so per-datagram dispatch stays ordered.
    fn call_discover_callbacks(&self, service: &DiscoveredService, status: ServiceStatus) {
        let matching: Vec<(DiscoverCallback, UserData)> = {
            let callbacks = self.callbacks.lock();
            callbacks
                .iter()
                .filter(|((_, identifier), _)| *identifier == service.identifier)
                .map(|(_, entry)| (entry.callback, Arc::clone(&entry.user_data)))
                .collect()
        };
        if matching.is_empty() {
            return;
        }
        std::thread::scope(|scope| {
            for (callback, user_data) in &matching {
                scope.spawn(move || callback(*service, status, user_data));
            }
        });
    }

}

/// Receive loop: responds to REQUESTs and tracks OFFER/DEPART broadcasts.
fn main_loop(weak: Weak<ManagerInner>) {
    loop {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.stop.load(MemOrdering::Relaxed) {
            return;
        }

        let raw = match inner.receiver.recv(RECV_INTERVAL) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                log::error!("[chirp] Receive failed, stopping discovery: {e}");
                return;
            }
        };

        let msg = match ChirpMessage::disassemble(&raw.content) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("[chirp] {e}");
                continue;
            }
        };

        log::trace!(
            "[chirp] Received {} from {}: group={}, host={}, service={}, port={}",
            msg.message_type(),
            raw.address,
            msg.group_id(),
            msg.host_id(),
            msg.service_id(),
            msg.port()
        );

        // Foreign groups and our own broadcasts are not for us
        if msg.group_id() != inner.group_id || msg.host_id() == inner.host_id {
            continue;
        }

        let service = DiscoveredService {
            address: raw.address,
            host_id: msg.host_id(),
            identifier: msg.service_id(),
            port: msg.port(),
        };

        match msg.message_type() {
            ChirpMessageType::Request => {
                let offers: Vec<RegisteredService> = inner
                    .registered
                    .lock()
                    .iter()
                    .filter(|s| s.identifier == msg.service_id())
                    .copied()
                    .collect();
                log::debug!("[chirp] Received REQUEST for {} services", msg.service_id());
                for offer in offers {
                    inner.send_message(ChirpMessageType::Offer, offer.identifier, offer.port);
                }
            }
            ChirpMessageType::Offer => {
                let inserted = inner.discovered.lock().insert(service);
                if inserted {
                    log::debug!(
                        "[chirp] {} service at {} discovered",
                        service.identifier,
                        service.to_uri()
                    );
                    inner.call_discover_callbacks(&service, ServiceStatus::Discovered);
                }
            }
            ChirpMessageType::Depart => {
                let removed = inner.discovered.lock().remove(&service);
                if removed {
                    log::debug!(
                        "[chirp] {} service at {} departed",
                        service.identifier,
                        service.to_uri()
                    );
                    inner.call_discover_callbacks(&service, ServiceStatus::Departed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_service_ordering() {
        // identifier takes priority over port
        let a = RegisteredService { identifier: ServiceIdentifier::Control, port: 1 };
        let b = RegisteredService { identifier: ServiceIdentifier::Data, port: 0 };
        assert!(a < b);
        // same identifier sorts by port
        let c = RegisteredService { identifier: ServiceIdentifier::Data, port: 1 };
        assert!(b < c);
        // self not smaller than self
        assert!(!(a < a));
    }

    #[test]
    fn discovered_service_ordering_ignores_address() {
        let id1 = Md5Hash::new("a");
        let id2 = Md5Hash::new("b");
        let ip1 = Ipv4Addr::new(1, 2, 3, 4);
        let ip2 = Ipv4Addr::new(4, 3, 2, 1);

        let on_ip1 = DiscoveredService {
            address: ip1,
            host_id: id1,
            identifier: ServiceIdentifier::Data,
            port: 0,
        };
        let on_ip2 = DiscoveredService { address: ip2, ..on_ip1 };
        assert_eq!(on_ip1, on_ip2, "same service over two NICs is one entry");

        let mut set = BTreeSet::new();
        set.insert(on_ip1);
        set.insert(on_ip2);
        assert_eq!(set.len(), 1);

        // host takes priority over identifier and port
        let other_host = DiscoveredService {
            address: ip1,
            host_id: id2,
            identifier: ServiceIdentifier::Control,
            port: 0,
        };
        assert!((id1 < id2) == (on_ip1 < other_host));
    }

    #[test]
    fn uri_rendering() {
        let service = DiscoveredService {
            address: Ipv4Addr::new(127, 0, 0, 1),
            host_id: Md5Hash::new("sat1"),
            identifier: ServiceIdentifier::Control,
            port: 23999,
        };
        assert_eq!(service.to_uri(), "tcp://127.0.0.1:23999");
    }
}
