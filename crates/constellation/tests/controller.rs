// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Controller tests: discovery-driven connections, command fan-out and
//! queued measurement processing against live satellites.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use constellation::chirp::Manager;
use constellation::config::Dictionary;
use constellation::controller::{
    Controller, ControllerError, Measurement, MeasurementCondition, MeasurementQueue,
};
use constellation::protocol::State;
use constellation::satellite::{BaseSatellite, PayloadSpec, Satellite};

const ANY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

struct Plain;

impl Satellite for Plain {}

struct Rig {
    _chirp_sat: Manager,
    _chirp_ctrl: Manager,
    _satellite: BaseSatellite,
    controller: Arc<Controller>,
    ctrl_chirp_handle: constellation::ChirpRef,
}

fn rig(port: u16) -> Rig {
    let group = format!("ctl{port}");
    let mut chirp_sat = Manager::with_port(ANY, ANY, &group, "Dummy.q1", port).expect("manager");
    chirp_sat.start();
    let mut chirp_ctrl = Manager::with_port(ANY, ANY, &group, "ctrl.main", port).expect("manager");
    chirp_ctrl.start();

    let satellite = BaseSatellite::new(
        "Dummy",
        "q1",
        chirp_sat.handle(),
        Box::new(Plain),
        PayloadSpec::Plain,
    )
    .expect("satellite");

    let handle = chirp_ctrl.handle();
    let controller = Arc::new(Controller::new("ctrl.main", handle.clone()));
    controller.start();

    Rig {
        _chirp_sat: chirp_sat,
        _chirp_ctrl: chirp_ctrl,
        _satellite: satellite,
        controller,
        ctrl_chirp_handle: handle,
    }
}

fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}

#[test]
fn discovers_and_identifies_satellites() {
    let rig = rig(18701);

    assert!(wait_for(|| rig.controller.connected_count() == 1, Duration::from_secs(5)));
    assert_eq!(rig.controller.satellites(), vec!["Dummy.q1".to_owned()]);

    let state = rig.controller.state_of("Dummy.q1").expect("state query");
    assert_eq!(state, State::New);
    assert!(!rig.controller.has_any_error_state());
}

#[test]
fn command_fanout_and_state_polling() {
    let rig = rig(18702);
    assert!(wait_for(|| rig.controller.connected_count() == 1, Duration::from_secs(5)));

    let mut configs = BTreeMap::new();
    configs.insert("Dummy.q1".to_owned(), Dictionary::new());
    rig.controller.initialize(&configs).expect("initialize");
    assert!(rig.controller.await_state(State::Init, Duration::from_secs(5)));

    rig.controller.launch_all().expect("launch");
    assert!(rig.controller.await_state(State::Orbit, Duration::from_secs(5)));

    rig.controller.start_all("ctl_run").expect("start");
    assert!(rig.controller.await_state(State::Run, Duration::from_secs(5)));

    rig.controller.stop_all().expect("stop");
    assert!(rig.controller.await_state(State::Orbit, Duration::from_secs(5)));

    rig.controller.land_all().expect("land");
    assert!(rig.controller.await_state(State::Init, Duration::from_secs(5)));
}

#[test]
fn unknown_satellite_is_reported() {
    let rig = rig(18703);
    assert!(wait_for(|| rig.controller.connected_count() == 1, Duration::from_secs(5)));

    match rig.controller.send_command("Dummy.other", "get_state", None) {
        Err(ControllerError::NotConnected(name)) => assert_eq!(name, "Dummy.other"),
        other => unreachable!("expected NotConnected, got {other:?}"),
    }
}

#[test]
fn rejected_commands_surface_as_unexpected_reply() {
    let rig = rig(18704);
    assert!(wait_for(|| rig.controller.connected_count() == 1, Duration::from_secs(5)));

    // launch is not allowed from NEW
    match rig.controller.launch_all() {
        Err(ControllerError::UnexpectedReply { .. }) => {}
        other => unreachable!("expected UnexpectedReply, got {other:?}"),
    }
}

#[test]
fn measurement_queue_runs_to_completion() {
    let rig = rig(18705);
    assert!(wait_for(|| rig.controller.connected_count() == 1, Duration::from_secs(5)));

    let mut configs = BTreeMap::new();
    configs.insert("Dummy.q1".to_owned(), Dictionary::new());
    rig.controller.initialize(&configs).expect("initialize");
    assert!(rig.controller.await_state(State::Init, Duration::from_secs(5)));
    rig.controller.launch_all().expect("launch");
    assert!(rig.controller.await_state(State::Orbit, Duration::from_secs(5)));

    let queue = MeasurementQueue::new(
        Arc::clone(&rig.controller),
        rig.ctrl_chirp_handle.clone(),
        "scan",
    );
    queue.append(Measurement {
        reconfigurations: BTreeMap::new(),
        condition: MeasurementCondition::Timer { duration: Duration::from_millis(200) },
    });
    queue.append(Measurement {
        reconfigurations: BTreeMap::new(),
        condition: MeasurementCondition::Timer { duration: Duration::from_millis(200) },
    });

    let completed = queue.process().expect("queue");
    assert_eq!(completed, 2);
    assert!(queue.is_empty());
    assert!(rig.controller.await_state(State::Orbit, Duration::from_secs(5)));

    // runs were labelled from the prefix; the last one sticks
    let reply = rig
        .controller
        .send_checked("Dummy.q1", "get_run_id", None)
        .expect("run id");
    assert_eq!(reply.verb(), "scan_2");
}
