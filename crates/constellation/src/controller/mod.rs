// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller-side building blocks: satellite connections, layered
//! configuration assembly and queued measurement processing.
//!
//! A controller discovers the `CONTROL` services of its group, keeps one
//! request socket per satellite and fans commands out. The measurement
//! queue automates reconfigure/start/await/stop cycles; any error state
//! observed in the swarm aborts queue processing.

pub mod config;
pub mod controller;
pub mod queue;

pub use config::ControllerConfiguration;
pub use controller::Controller;
pub use queue::{Measurement, MeasurementCondition, MeasurementQueue, MetricComparator};

use crate::message::{CscpType, DecodeError};
use crate::transport::NetworkError;

/// Controller-side failure.
#[derive(Debug)]
pub enum ControllerError {
    /// No connection to a satellite of that name.
    NotConnected(String),
    /// Request transport failed.
    Network(NetworkError),
    /// Reply could not be decoded.
    Decode(DecodeError),
    /// The satellite answered with a non-success type.
    UnexpectedReply { verb_type: CscpType, message: String },
    /// Queued measurement processing was aborted.
    Queue(String),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::NotConnected(name) => {
                write!(f, "No connection to satellite {name}")
            }
            ControllerError::Network(e) => write!(f, "{e}"),
            ControllerError::Decode(e) => write!(f, "{e}"),
            ControllerError::UnexpectedReply { verb_type, message } => {
                write!(f, "Satellite replied {verb_type}: {message}")
            }
            ControllerError::Queue(reason) => {
                write!(f, "Aborting queue processing: {reason}")
            }
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Network(e) => Some(e),
            ControllerError::Decode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NetworkError> for ControllerError {
    fn from(e: NetworkError) -> Self {
        ControllerError::Network(e)
    }
}

impl From<DecodeError> for ControllerError {
    fn from(e: DecodeError) -> Self {
        ControllerError::Decode(e)
    }
}
