// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Configuration data model: values, wire containers and the tracked store.
//!
//! A controller ships a flat [`Dictionary`] to a satellite inside the
//! `initialize` payload; the satellite turns it into a [`Configuration`]
//! whose typed accessors track which keys were actually consumed by the
//! user code and the framework.

pub mod configuration;
pub mod dictionary;
pub mod value;

pub use configuration::{ConfigError, Configuration, Group, Usage};
pub use dictionary::{Dictionary, List};
pub use value::{FromValue, IntoValue, Value};
