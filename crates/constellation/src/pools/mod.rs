// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Dynamic fan-in pools over CHIRP-discovered peers.
//!
//! A pool watches one CHIRP service identifier, connects a client socket to
//! every discovered peer, and drives all of those sockets from a single
//! poll loop. Decoded messages are handed to one pool callback; lifecycle
//! hooks fire as peers come and go. The heartbeat receiver, the CMDP
//! listeners and the CDTP receiver are all pools.

pub mod base;

pub use base::{
    BasePool, PoolCallbacks, PoolError, PoolMessage, PoolSocket, PoolSubscriber, SubscriberPool,
};
