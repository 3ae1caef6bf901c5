// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Satellites: lifecycle-controlled processes driven over CSCP.
//!
//! A satellite is user logic (the [`Satellite`] trait) mounted into
//! [`BaseSatellite`], which owns the CSCP reply loop, the FSM, the
//! heartbeat manager and the monitoring publisher. The optional data-plane
//! flavor is a capability value, not a subclass: a satellite carries
//! [`Payload::None`], a [`Payload::Transmitter`] or a [`Payload::Receiver`]
//! and the FSM wrappers call into whichever is mounted.

pub mod base;
pub mod commands;
pub mod fsm;
pub mod receiver;
pub mod transmitter;

pub use base::{BaseSatellite, PayloadSpec};
pub use commands::{CommandError, CommandRegistry, UserCommand};
pub use fsm::{CancellationToken, Fsm};
pub use receiver::{DataReceiver, ReceiverHooks};
pub use transmitter::DataTransmitter;

use crate::config::{ConfigError, Configuration};
use crate::protocol::State;
use std::time::Duration;

/// Failure of a lifecycle hook or a data-plane operation.
///
/// Any of these raised from a transitional hook takes the FSM to ERROR,
/// with the message recorded as the satellite status.
#[derive(Debug)]
pub enum SatelliteError {
    /// The hook failed with a user-provided reason.
    Failed(String),
    /// Configuration access failed.
    Config(ConfigError),
    /// A critical send did not complete within its deadline.
    SendTimeout { what: &'static str, timeout: Duration },
    /// Transport-level failure.
    Network(crate::transport::NetworkError),
}

impl std::fmt::Display for SatelliteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SatelliteError::Failed(reason) => f.write_str(reason),
            SatelliteError::Config(e) => write!(f, "{e}"),
            SatelliteError::SendTimeout { what, timeout } => {
                write!(f, "Failed to send {what} after {}s", timeout.as_secs())
            }
            SatelliteError::Network(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SatelliteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SatelliteError::Config(e) => Some(e),
            SatelliteError::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for SatelliteError {
    fn from(e: ConfigError) -> Self {
        SatelliteError::Config(e)
    }
}

impl From<crate::transport::NetworkError> for SatelliteError {
    fn from(e: crate::transport::NetworkError) -> Self {
        SatelliteError::Network(e)
    }
}

/// The mounted data-plane capability of a satellite.
pub enum Payload {
    /// No data plane.
    None,
    /// CDTP producer.
    Transmitter(DataTransmitter),
    /// CDTP consumer.
    Receiver(DataReceiver),
}

/// Context handed to lifecycle hooks, exposing the mounted capability.
pub struct SatelliteContext<'a> {
    pub(crate) payload: &'a mut Payload,
}

impl SatelliteContext<'_> {
    /// The transmitter capability, when mounted.
    pub fn transmitter(&mut self) -> Option<&mut DataTransmitter> {
        match self.payload {
            Payload::Transmitter(tx) => Some(tx),
            _ => None,
        }
    }

    /// The receiver capability, when mounted.
    pub fn receiver(&mut self) -> Option<&mut DataReceiver> {
        match self.payload {
            Payload::Receiver(rx) => Some(rx),
            _ => None,
        }
    }
}

/// User satellite logic: the lifecycle hooks.
///
/// All hooks run on the FSM worker thread. Returning an error from a hook
/// moves the FSM to ERROR. The `running` hook must poll its cancellation
/// token; every other hook is expected to complete promptly.
#[allow(unused_variables)]
pub trait Satellite: Send + 'static {
    /// Whether `reconfigure` is offered at all.
    fn supports_reconfigure(&self) -> bool {
        false
    }

    /// Consume the configuration shipped with `initialize`.
    fn initializing(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        config: &mut Configuration,
    ) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// Acquire hardware/resources before runs.
    fn launching(&mut self, ctx: &mut SatelliteContext<'_>) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// Release what `launching` acquired.
    fn landing(&mut self, ctx: &mut SatelliteContext<'_>) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// Apply a partial configuration while in ORBIT.
    fn reconfiguring(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        partial: &Configuration,
    ) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// Prepare a run; `run_id` identifies it for the whole swarm.
    fn starting(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        run_id: &str,
    ) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// Conclude the current run.
    fn stopping(&mut self, ctx: &mut SatelliteContext<'_>) -> Result<(), SatelliteError> {
        Ok(())
    }

    /// The run body; must return soon after `token` is cancelled.
    ///
    /// The default idles until cancellation, which is what receiver
    /// satellites want (their work happens on the pool thread).
    fn running(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        token: &CancellationToken,
    ) -> Result<(), SatelliteError> {
        while !token.is_cancelled() {
            if let Some(receiver) = ctx.receiver() {
                receiver.check_failures()?;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        Ok(())
    }

    /// Safe-mode entry after an interrupt. Should avoid failing.
    ///
    /// The default performs an orderly retreat: stop the run when one was
    /// active, then land.
    fn interrupting(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        previous: State,
    ) -> Result<(), SatelliteError> {
        if previous == State::Run {
            self.stopping(ctx)?;
        }
        if matches!(previous, State::Run | State::Orbit) {
            self.landing(ctx)?;
        }
        Ok(())
    }

    /// Last-resort cleanup on the way to ERROR. Must not fail.
    fn failure(&mut self, ctx: &mut SatelliteContext<'_>, previous: State) {}
}
