// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry: metric descriptors and the STAT publishing manager.

pub mod metrics;

pub use metrics::{Metric, MetricType, MetricsManager, StatValue};
