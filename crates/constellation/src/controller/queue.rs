// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queued measurement processing.
//!
//! A measurement is a reconfigure/start/await/stop cycle; a queue runs them
//! back to back, deriving run identifiers from a common prefix. Observing
//! any ERROR or SAFE state in the swarm aborts processing with a
//! [`ControllerError::Queue`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::chirp::ChirpRef;
use crate::config::{Dictionary, Value};
use crate::controller::{Controller, ControllerError};
use crate::listener::StatListener;

/// How long a metric condition waits for the first matching sample before
/// concluding the metric does not exist.
const METRIC_RECEPTION_TIMEOUT: Duration = Duration::from_secs(60);

/// Comparison applied by a metric condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricComparator {
    LessThan,
    GreaterThan,
    Equal,
}

impl MetricComparator {
    /// Numeric comparison; non-numeric samples never satisfy.
    fn matches(&self, sample: &Value, target: &Value) -> bool {
        let (Some(sample), Some(target)) = (as_f64(sample), as_f64(target)) else {
            return false;
        };
        match self {
            MetricComparator::LessThan => sample < target,
            MetricComparator::GreaterThan => sample > target,
            MetricComparator::Equal => sample == target,
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            MetricComparator::LessThan => "<",
            MetricComparator::GreaterThan => ">",
            MetricComparator::Equal => "==",
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

/// When a running measurement is considered complete.
pub enum MeasurementCondition {
    /// Run for a fixed duration.
    Timer { duration: Duration },
    /// Run until `remote` reports `metric` satisfying the comparison.
    Metric {
        remote: String,
        metric: String,
        target: Value,
        comparator: MetricComparator,
    },
}

impl MeasurementCondition {
    /// Block until the condition is met, `running` is cleared, or the swarm
    /// degrades.
    pub fn await_condition(
        &self,
        running: &AtomicBool,
        controller: &Controller,
        chirp: &ChirpRef,
    ) -> Result<(), ControllerError> {
        match self {
            MeasurementCondition::Timer { duration } => {
                log::debug!("[controller] Starting condition timer with {duration:?}");
                let deadline = Instant::now() + *duration;
                while running.load(Ordering::Relaxed) && Instant::now() < deadline {
                    if controller.has_any_error_state() {
                        return Err(ControllerError::Queue("detected issue".into()));
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Ok(())
            }
            MeasurementCondition::Metric { remote, metric, target, comparator } => {
                self.await_metric(running, controller, chirp, remote, metric, target, *comparator)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn await_metric(
        &self,
        running: &AtomicBool,
        controller: &Controller,
        chirp: &ChirpRef,
        remote: &str,
        metric: &str,
        target: &Value,
        comparator: MetricComparator,
    ) -> Result<(), ControllerError> {
        log::debug!(
            "[controller] Running until {remote} reports {metric} {} {target}",
            comparator.describe()
        );

        let satisfied = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(AtomicBool::new(false));
        let listener = {
            let satisfied = Arc::clone(&satisfied);
            let seen = Arc::clone(&seen);
            let remote = remote.to_owned();
            let metric = metric.to_uppercase();
            let target = target.clone();
            StatListener::new(chirp.clone(), move |record| {
                if !record.sender.eq_ignore_ascii_case(&remote) || record.metric != metric {
                    return;
                }
                seen.store(true, Ordering::Relaxed);
                if comparator.matches(&record.stat.value, &target) {
                    satisfied.store(true, Ordering::Relaxed);
                }
            })
        };
        listener.start_pool();
        listener.subscribe_metric(metric);

        let reception_deadline = Instant::now() + METRIC_RECEPTION_TIMEOUT;
        let result = loop {
            if !running.load(Ordering::Relaxed) || satisfied.load(Ordering::Relaxed) {
                break Ok(());
            }
            if controller.has_any_error_state() {
                break Err(ControllerError::Queue("detected issue".into()));
            }
            if !seen.load(Ordering::Relaxed) && Instant::now() >= reception_deadline {
                break Err(ControllerError::Queue(format!(
                    "condition metric {metric} was never received from satellite {remote}"
                )));
            }
            std::thread::sleep(Duration::from_millis(100));
        };

        listener.stop_pool();
        result
    }
}

impl std::fmt::Display for MeasurementCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementCondition::Timer { duration } => {
                write!(f, "Run for {duration:?}")
            }
            MeasurementCondition::Metric { remote, metric, target, comparator } => {
                write!(f, "Run until {remote} reports {metric} {} {target}", comparator.describe())
            }
        }
    }
}

/// One queued measurement.
pub struct Measurement {
    /// Partial reconfiguration per satellite, applied before the run.
    pub reconfigurations: BTreeMap<String, Dictionary>,
    /// Completion condition for the run.
    pub condition: MeasurementCondition,
}

/// A queue of measurements processed back to back.
pub struct MeasurementQueue {
    controller: Arc<Controller>,
    chirp: ChirpRef,
    run_id_prefix: String,
    measurements: Mutex<Vec<Measurement>>,
    running: AtomicBool,
}

impl MeasurementQueue {
    pub fn new(controller: Arc<Controller>, chirp: ChirpRef, run_id_prefix: impl Into<String>) -> Self {
        MeasurementQueue {
            controller,
            chirp,
            run_id_prefix: run_id_prefix.into(),
            measurements: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Append a measurement to the queue.
    pub fn append(&self, measurement: Measurement) {
        self.measurements.lock().push(measurement);
    }

    /// Number of queued measurements.
    pub fn len(&self) -> usize {
        self.measurements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.lock().is_empty()
    }

    /// Ask a running `process` call to halt after the current measurement.
    pub fn halt(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Process every queued measurement; returns the number of completed
    /// runs. The satellites must be in ORBIT when this is called.
    pub fn process(&self) -> Result<usize, ControllerError> {
        self.running.store(true, Ordering::Relaxed);
        let mut completed = 0usize;

        loop {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let Some(measurement) = ({
                let mut measurements = self.measurements.lock();
                if measurements.is_empty() {
                    None
                } else {
                    Some(measurements.remove(0))
                }
            }) else {
                break;
            };

            let run_id = format!("{}_{}", self.run_id_prefix, completed + 1);
            log::info!(
                "[controller] Measurement {run_id}: {}",
                measurement.condition
            );

            for (satellite, partial) in &measurement.reconfigurations {
                self.controller.reconfigure(satellite, partial)?;
            }
            self.controller.await_orbit()?;

            self.controller.start_all(&run_id)?;
            if !self.controller.await_state(crate::protocol::State::Run, Duration::from_secs(10)) {
                return Err(ControllerError::Queue("satellites did not reach RUN".into()));
            }
            let awaited = measurement.condition.await_condition(
                &self.running,
                &self.controller,
                &self.chirp,
            );
            // Always try to stop the run, even on an aborted condition
            let stopped = self.controller.stop_all();
            awaited?;
            stopped?;
            completed += 1;
        }

        self.running.store(false, Ordering::Relaxed);
        Ok(completed)
    }
}

impl Controller {
    /// Wait for every satellite to settle in ORBIT (transitions finish
    /// asynchronously after their commands are accepted).
    pub(crate) fn await_orbit(&self) -> Result<(), ControllerError> {
        if self.await_state(crate::protocol::State::Orbit, Duration::from_secs(10)) {
            Ok(())
        } else {
            Err(ControllerError::Queue("satellites did not settle in ORBIT".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparator_semantics() {
        let cmp = MetricComparator::GreaterThan;
        assert!(cmp.matches(&Value::Int(5), &Value::Int(4)));
        assert!(!cmp.matches(&Value::Int(4), &Value::Int(4)));
        assert!(cmp.matches(&Value::Float(4.5), &Value::Int(4)));
        assert!(!cmp.matches(&Value::Str("5".into()), &Value::Int(4)), "non-numeric never matches");

        assert!(MetricComparator::LessThan.matches(&Value::Int(3), &Value::Int(4)));
        assert!(MetricComparator::Equal.matches(&Value::Int(4), &Value::Float(4.0)));
    }

    #[test]
    fn condition_rendering() {
        let timer = MeasurementCondition::Timer { duration: Duration::from_secs(5) };
        assert_eq!(timer.to_string(), "Run for 5s");

        let metric = MeasurementCondition::Metric {
            remote: "Dummy.s1".into(),
            metric: "EVENTS".into(),
            target: Value::Int(1000),
            comparator: MetricComparator::GreaterThan,
        };
        assert_eq!(metric.to_string(), "Run until Dummy.s1 reports EVENTS > 1000");
    }
}
