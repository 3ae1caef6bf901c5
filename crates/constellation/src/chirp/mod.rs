// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP: peer discovery over UDP broadcast.
//!
//! Every process runs one [`Manager`] that advertises its services, listens
//! for the announcements of others in the same group, and notifies
//! registered callbacks about service arrivals and departures.
//!
//! ```text
//! host A                                   host B
//! +------------------+    OFFER (UDP)     +------------------+
//! | Manager          | -----------------> | Manager          |
//! |  registered: [..]|    REQUEST         |  discovered: [..]|
//! |                  | <----------------- |  callbacks: [..] |
//! +------------------+                    +------------------+
//! ```
//!
//! Hosts only see peers in their own group: datagrams whose group id does
//! not match are dropped, as are a host's own broadcasts.

pub mod manager;
pub mod socket;

pub use manager::{
    ChirpRef, DiscoverCallback, DiscoveredService, Manager, RegisteredService, ServiceStatus,
    UserData,
};
pub use socket::{BroadcastRecv, BroadcastSend, RawDatagram};
