// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Constellation - supervisory control and data acquisition runtime
//!
//! Constellation drives a swarm of "satellites" - independent processes on
//! commodity hosts - through a uniform operational lifecycle. Satellites
//! discover each other over UDP, obey controllers over a request/reply
//! protocol, emit structured telemetry and heartbeats, and optionally
//! stream payload data from producers to consumers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use constellation::chirp::Manager;
//! use constellation::satellite::{BaseSatellite, PayloadSpec, Satellite};
//!
//! struct Dummy;
//! impl Satellite for Dummy {}
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut chirp = Manager::new(
//!         "255.255.255.255".parse()?,
//!         "0.0.0.0".parse()?,
//!         "edda",
//!         "Dummy.d1",
//!     )?;
//!     chirp.start();
//!
//!     let mut satellite = BaseSatellite::new(
//!         "Dummy",
//!         "d1",
//!         chirp.handle(),
//!         Box::new(Dummy),
//!         PayloadSpec::Plain,
//!     )?;
//!     satellite.join();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        Satellite Layer                              |
//! |   BaseSatellite -> FSM -> user hooks -> data-plane capability       |
//! +---------------------------------------------------------------------+
//! |                        Service Layer                                |
//! |   Heartbeats (CHP) | Monitoring (CMDP) | Listeners | Telemetry      |
//! +---------------------------------------------------------------------+
//! |                        Discovery Layer                              |
//! |   CHIRP manager | Subscriber pools over discovered peers            |
//! +---------------------------------------------------------------------+
//! |                        Transport Layer                              |
//! |   UDP broadcast | framed TCP req/rep, pub/sub, push/pull            |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`chirp::Manager`] | Peer discovery: advertise and find services |
//! | [`satellite::BaseSatellite`] | The satellite runtime, mounts user logic |
//! | [`satellite::Satellite`] | The lifecycle hooks user code implements |
//! | [`satellite::DataTransmitter`] | CDTP producer capability |
//! | [`satellite::DataReceiver`] | CDTP consumer capability |
//! | [`listener::LogListener`] | Log stream consumer |
//! | [`config::Configuration`] | Case-folded key/value store with usage tracking |

/// Peer discovery over UDP broadcast (CHIRP).
pub mod chirp;
/// Configuration data model: values, dictionaries, the tracked store.
pub mod config;
/// Controller-side connections, layered configs, measurement queues.
pub mod controller;
/// CHP heartbeating: liveness beacons and failure detection.
pub mod heartbeat;
/// Passive consumers of CMDP monitoring streams.
pub mod listener;
/// Wire framing for all protocol units.
pub mod message;
/// The satellite-side CMDP publishing endpoint.
pub mod monitoring;
/// Dynamic fan-in pools over discovered peers.
pub mod pools;
/// Protocol constants and closed enumerations.
pub mod protocol;
/// Satellites: FSM, command dispatch, data plane.
pub mod satellite;
/// Metric descriptors and STAT publishing.
pub mod telemetry;
/// Stream transport under the framed protocols.
pub mod transport;

pub use chirp::{ChirpRef, DiscoveredService, Manager, ServiceStatus};
pub use config::{Configuration, Dictionary, List, Value};
pub use message::Md5Hash;
pub use protocol::{Level, RunCondition, ServiceIdentifier, State};
pub use satellite::{
    BaseSatellite, CancellationToken, PayloadSpec, Satellite, SatelliteContext, SatelliteError,
};

/// Framework version.
pub const VERSION: &str = "0.3.2";

/// Framework version with product name, as announced over the wire.
pub const VERSION_FULL: &str = "Constellation v0.3.2";
