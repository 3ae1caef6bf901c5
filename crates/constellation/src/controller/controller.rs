// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The controller: discovered satellite connections and command fan-out.
//!
//! Connections follow CHIRP: a discovered `CONTROL` service is connected
//! and identified with a `get_name` query on a short-lived thread (so the
//! discovery dispatch is never starved), a departing or dead one is
//! dropped. One request is in flight per satellite; requests to different
//! satellites proceed independently.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::chirp::{ChirpRef, DiscoveredService, ServiceStatus, UserData};
use crate::config::{Dictionary, Value};
use crate::controller::ControllerError;
use crate::message::{CscpMessage, CscpType};
use crate::protocol::{ServiceIdentifier, State};
use crate::transport::ReqSocket;

/// Reply deadline for one command.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

struct Connection {
    service: DiscoveredService,
    socket: ReqSocket,
}

struct ControllerInner {
    name: String,
    connections: Mutex<BTreeMap<String, Arc<Mutex<Connection>>>>,
}

/// A controller for the satellites of one group.
pub struct Controller {
    inner: Arc<ControllerInner>,
    chirp: ChirpRef,
}

/// Context for the CHIRP discover callback.
struct ChirpContext {
    controller: Weak<ControllerInner>,
}

impl Controller {
    /// Create a controller; call [`Controller::start`] to begin discovery.
    pub fn new(name: impl Into<String>, chirp: ChirpRef) -> Self {
        Controller {
            inner: Arc::new(ControllerInner {
                name: name.into(),
                connections: Mutex::new(BTreeMap::new()),
            }),
            chirp,
        }
    }

    /// Hook into CHIRP and ask the group for its control endpoints.
    pub fn start(&self) {
        let context: UserData = Arc::new(ChirpContext { controller: Arc::downgrade(&self.inner) });
        self.chirp.register_discover_callback(
            chirp_callback,
            ServiceIdentifier::Control,
            context,
        );
        for service in self.chirp.discovered_services_of(ServiceIdentifier::Control) {
            self.inner.adopt(service);
        }
        self.chirp.send_request(ServiceIdentifier::Control);
    }

    /// Unhook from CHIRP and drop every connection.
    pub fn stop(&self) {
        self.chirp.unregister_discover_callback(chirp_callback, ServiceIdentifier::Control);
        self.inner.connections.lock().clear();
    }

    /// Canonical names of the connected satellites.
    pub fn satellites(&self) -> Vec<String> {
        self.inner.connections.lock().keys().cloned().collect()
    }

    /// Number of connected satellites.
    pub fn connected_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Send one command to one satellite and return its reply.
    pub fn send_command(
        &self,
        satellite: &str,
        verb: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<CscpMessage, ControllerError> {
        let connection = self
            .inner
            .connection(satellite)
            .ok_or_else(|| ControllerError::NotConnected(satellite.to_owned()))?;
        let mut connection = connection.lock();

        let mut msg = CscpMessage::request(self.inner.name.clone(), verb);
        if let Some(payload) = payload {
            msg = msg.with_payload(payload);
        }
        let reply = match connection.socket.request(&msg.assemble(), COMMAND_TIMEOUT) {
            Ok(frames) => frames,
            Err(e) => {
                // A broken connection is dropped; CHIRP will re-offer it
                let service = connection.service;
                drop(connection);
                self.inner.remove(&service);
                return Err(e.into());
            }
        };
        Ok(CscpMessage::disassemble(&reply)?)
    }

    /// Send a command expecting a SUCCESS reply.
    pub fn send_checked(
        &self,
        satellite: &str,
        verb: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<CscpMessage, ControllerError> {
        let reply = self.send_command(satellite, verb, payload)?;
        if reply.verb_type() != CscpType::Success {
            return Err(ControllerError::UnexpectedReply {
                verb_type: reply.verb_type(),
                message: reply.verb().to_owned(),
            });
        }
        Ok(reply)
    }

    /// Fan a command out to every connected satellite.
    pub fn send_all(
        &self,
        verb: &str,
        payload: Option<Vec<u8>>,
    ) -> BTreeMap<String, Result<CscpMessage, ControllerError>> {
        let names = self.satellites();
        names
            .into_iter()
            .map(|name| {
                let reply = self.send_command(&name, verb, payload.clone());
                (name, reply)
            })
            .collect()
    }

    /// Initialize each satellite with its own configuration dictionary.
    pub fn initialize(
        &self,
        configurations: &BTreeMap<String, Dictionary>,
    ) -> Result<(), ControllerError> {
        for (name, dictionary) in configurations {
            self.send_checked(name, "initialize", Some(dictionary.assemble()))?;
        }
        Ok(())
    }

    /// Reconfigure one satellite with a partial dictionary.
    pub fn reconfigure(
        &self,
        satellite: &str,
        partial: &Dictionary,
    ) -> Result<(), ControllerError> {
        self.send_checked(satellite, "reconfigure", Some(partial.assemble()))?;
        Ok(())
    }

    /// Launch every satellite.
    pub fn launch_all(&self) -> Result<(), ControllerError> {
        self.checked_broadcast("launch", None)
    }

    /// Land every satellite.
    pub fn land_all(&self) -> Result<(), ControllerError> {
        self.checked_broadcast("land", None)
    }

    /// Start a run on every satellite.
    pub fn start_all(&self, run_id: &str) -> Result<(), ControllerError> {
        self.checked_broadcast("start", Some(Value::Str(run_id.to_owned()).assemble()))
    }

    /// Stop the current run on every satellite.
    pub fn stop_all(&self) -> Result<(), ControllerError> {
        self.checked_broadcast("stop", None)
    }

    fn checked_broadcast(
        &self,
        verb: &str,
        payload: Option<Vec<u8>>,
    ) -> Result<(), ControllerError> {
        for (name, reply) in self.send_all(verb, payload) {
            match reply {
                Ok(msg) if msg.verb_type() == CscpType::Success => {}
                Ok(msg) => {
                    return Err(ControllerError::UnexpectedReply {
                        verb_type: msg.verb_type(),
                        message: format!("{name}: {}", msg.verb()),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Query one satellite's FSM state.
    pub fn state_of(&self, satellite: &str) -> Result<State, ControllerError> {
        let reply = self.send_checked(satellite, "get_state", None)?;
        let byte = reply
            .payload()
            .and_then(|p| Value::disassemble(p).ok())
            .and_then(|v| match v {
                Value::Int(i) => u8::try_from(i).ok(),
                _ => None,
            })
            .ok_or(ControllerError::Decode(crate::message::DecodeError::MissingFrame(
                "state payload",
            )))?;
        State::from_byte(byte).ok_or(ControllerError::Decode(
            crate::message::DecodeError::UnknownMessageType(byte),
        ))
    }

    /// Query every satellite's FSM state.
    pub fn states(&self) -> BTreeMap<String, Result<State, ControllerError>> {
        self.satellites()
            .into_iter()
            .map(|name| {
                let state = self.state_of(&name);
                (name, state)
            })
            .collect()
    }

    /// True when any satellite reports ERROR or SAFE.
    pub fn has_any_error_state(&self) -> bool {
        self.states()
            .values()
            .any(|state| state.as_ref().map(|s| s.indicates_failure()).unwrap_or(false))
    }

    /// Wait until every satellite reports `state` or the timeout passes.
    pub fn await_state(&self, state: State, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let states = self.states();
            let reached = !states.is_empty()
                && states.values().all(|s| s.as_ref().map(|s| *s == state).unwrap_or(false));
            if reached {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}

impl ControllerInner {
    fn connection(&self, satellite: &str) -> Option<Arc<Mutex<Connection>>> {
        // Canonical names compare case-insensitively
        let folded = satellite.to_lowercase();
        self.connections
            .lock()
            .iter()
            .find(|(name, _)| name.to_lowercase() == folded)
            .map(|(_, conn)| Arc::clone(conn))
    }

    /// Connect to a freshly discovered control endpoint.
    ///
    /// Runs the blocking identification handshake on a short-lived thread.
    fn adopt(self: &Arc<Self>, service: DiscoveredService) {
        let inner = Arc::clone(self);
        std::thread::spawn(move || {
            let mut socket = match ReqSocket::connect(service.socket_addr()) {
                Ok(socket) => socket,
                Err(e) => {
                    log::warn!("[controller] Failed to connect to {}: {e}", service.to_uri());
                    return;
                }
            };
            let request = CscpMessage::request(inner.name.clone(), "get_name");
            let name = match socket
                .request(&request.assemble(), COMMAND_TIMEOUT)
                .map_err(ControllerError::from)
                .and_then(|frames| CscpMessage::disassemble(&frames).map_err(Into::into))
            {
                Ok(reply) if reply.verb_type() == CscpType::Success => {
                    reply.verb().to_owned()
                }
                Ok(reply) => {
                    log::warn!(
                        "[controller] {} rejected identification: {}",
                        service.to_uri(),
                        reply.verb()
                    );
                    return;
                }
                Err(e) => {
                    log::warn!("[controller] Identification of {} failed: {e}", service.to_uri());
                    return;
                }
            };

            log::info!("[controller] Connected to {name} at {}", service.to_uri());
            inner
                .connections
                .lock()
                .insert(name, Arc::new(Mutex::new(Connection { service, socket })));
        });
    }

    fn remove(&self, service: &DiscoveredService) {
        let mut connections = self.connections.lock();
        let name = connections
            .iter()
            .find(|(_, conn)| conn.lock().service == *service)
            .map(|(name, _)| name.clone());
        if let Some(name) = name {
            log::info!("[controller] Disconnected from {name}");
            connections.remove(&name);
        }
    }
}

fn chirp_callback(service: DiscoveredService, status: ServiceStatus, user_data: &UserData) {
    let Some(context) = user_data.downcast_ref::<ChirpContext>() else {
        return;
    };
    let Some(inner) = context.controller.upgrade() else {
        return;
    };
    match status {
        ServiceStatus::Discovered => inner.adopt(service),
        ServiceStatus::Departed | ServiceStatus::Dead => inner.remove(&service),
    }
}
