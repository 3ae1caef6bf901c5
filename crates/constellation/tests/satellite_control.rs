// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP control-plane tests: a controller socket driving one satellite.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use constellation::chirp::Manager;
use constellation::config::{Dictionary, List, Value};
use constellation::message::{CscpMessage, CscpType, MessageHeader};
use constellation::protocol::State;
use constellation::satellite::{
    BaseSatellite, PayloadSpec, Satellite, SatelliteContext, SatelliteError,
};
use constellation::transport::ReqSocket;

const ANY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

struct TestSat {
    fail_initializing: bool,
    reconfigurable: bool,
}

impl Default for TestSat {
    fn default() -> Self {
        TestSat { fail_initializing: false, reconfigurable: false }
    }
}

impl Satellite for TestSat {
    fn supports_reconfigure(&self) -> bool {
        self.reconfigurable
    }

    fn initializing(
        &mut self,
        _ctx: &mut SatelliteContext<'_>,
        _config: &mut constellation::Configuration,
    ) -> Result<(), SatelliteError> {
        if self.fail_initializing {
            return Err(SatelliteError::Failed("device not found".into()));
        }
        Ok(())
    }
}

struct Fixture {
    _chirp: Manager,
    satellite: BaseSatellite,
    controller: ReqSocket,
}

fn fixture(port: u16, sat: TestSat) -> Fixture {
    let chirp =
        Manager::with_port(ANY, ANY, "ctrltest", &format!("Dummy.s{port}"), port).expect("manager");
    let satellite = BaseSatellite::new(
        "Dummy",
        &format!("s{port}"),
        chirp.handle(),
        Box::new(sat),
        PayloadSpec::Plain,
    )
    .expect("satellite");
    let controller =
        ReqSocket::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, satellite.port())))
            .expect("connect");
    Fixture { _chirp: chirp, satellite, controller }
}

impl Fixture {
    fn request(&mut self, verb: &str, payload: Option<Vec<u8>>) -> CscpMessage {
        let mut msg = CscpMessage::request("ctrl.test", verb);
        if let Some(payload) = payload {
            msg = msg.with_payload(payload);
        }
        let reply = self
            .controller
            .request(&msg.assemble(), Duration::from_secs(5))
            .expect("reply");
        CscpMessage::disassemble(&reply).expect("decodable reply")
    }

    fn wait_for_state(&self, state: State) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self.satellite.state() == state {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        self.satellite.state() == state
    }

    fn transition(&mut self, verb: &str, payload: Option<Vec<u8>>, target: State) {
        let reply = self.request(verb, payload);
        assert_eq!(reply.verb_type(), CscpType::Success, "{verb}: {}", reply.verb());
        assert!(self.wait_for_state(target), "{verb} should reach {target}");
    }
}

fn empty_config() -> Vec<u8> {
    Dictionary::new().assemble()
}

#[test]
fn get_state_on_fresh_satellite() {
    let mut fx = fixture(18301, TestSat::default());

    let reply = fx.request("get_state", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert_eq!(reply.verb(), "NEW");

    let payload = reply.payload().expect("state byte payload");
    let value = Value::disassemble(payload).expect("msgpack");
    assert_eq!(value, Value::Int(i64::from(State::New as u8)));

    match reply.header().tags().get("last_changed") {
        Some(Value::Time(_)) => {}
        other => unreachable!("last_changed should be a timestamp, got {other:?}"),
    }
}

#[test]
fn identity_queries() {
    let mut fx = fixture(18302, TestSat::default());

    let reply = fx.request("GET_NAME", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert_eq!(reply.verb(), "Dummy.s18302");

    let reply = fx.request("get_version", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(reply.verb().contains("Constellation"));

    let reply = fx.request("get_commands", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    let dict = Dictionary::disassemble(reply.payload().expect("payload")).expect("dict");
    assert!(dict.contains_key("initialize"));
    assert!(dict.contains_key("get_state"));
    assert!(!dict.contains_key("reconfigure"), "not offered without support");
}

#[test]
fn unknown_command_reply() {
    let mut fx = fixture(18303, TestSat::default());
    let reply = fx.request("fire_thrusters", None);
    assert_eq!(reply.verb_type(), CscpType::Unknown);
    assert!(reply.verb().contains("fire_thrusters"));
}

#[test]
fn non_request_messages_are_rejected() {
    let mut fx = fixture(18304, TestSat::default());
    let msg = CscpMessage::new(MessageHeader::new("ctrl.test"), CscpType::Success, "hello");
    let reply = fx
        .controller
        .request(&msg.assemble(), Duration::from_secs(5))
        .expect("reply");
    let reply = CscpMessage::disassemble(&reply).expect("decodable");
    assert_eq!(reply.verb_type(), CscpType::Error);
}

#[test]
fn lifecycle_walk() {
    let mut fx = fixture(18305, TestSat::default());

    let mut config = Dictionary::new();
    config.insert("_heartbeat_interval", 1u64);
    fx.transition("initialize", Some(config.assemble()), State::Init);

    // consumed framework keys show up in get_config
    let reply = fx.request("get_config", None);
    let dict = Dictionary::disassemble(reply.payload().expect("payload")).expect("dict");
    assert!(dict.contains_key("_heartbeat_interval"));

    fx.transition("launch", None, State::Orbit);

    // shutdown is refused outside NEW/INIT/SAFE/ERROR
    let reply = fx.request("shutdown", None);
    assert_eq!(reply.verb_type(), CscpType::Invalid);

    // stop without a run is refused
    let reply = fx.request("stop", None);
    assert_eq!(reply.verb_type(), CscpType::Invalid);

    fx.transition("land", None, State::Init);

    let reply = fx.request("shutdown", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(fx.satellite.is_terminated());
}

#[test]
fn reconfigure_without_support_is_not_implemented() {
    let mut fx = fixture(18306, TestSat::default());
    fx.transition("initialize", Some(empty_config()), State::Init);

    let reply = fx.request("reconfigure", Some(empty_config()));
    assert_eq!(reply.verb_type(), CscpType::NotImplemented);
    assert_eq!(fx.satellite.state(), State::Init, "no state change");
}

#[test]
fn reconfigure_with_support() {
    let mut fx = fixture(18307, TestSat { fail_initializing: false, reconfigurable: true });
    fx.transition("initialize", Some(empty_config()), State::Init);
    fx.transition("launch", None, State::Orbit);

    let mut partial = Dictionary::new();
    partial.insert("_heartbeat_interval", 2u64);
    fx.transition("reconfigure", Some(partial.assemble()), State::Orbit);
}

#[test]
fn start_payload_validation() {
    let mut fx = fixture(18308, TestSat::default());
    fx.transition("initialize", Some(empty_config()), State::Init);
    fx.transition("launch", None, State::Orbit);

    let reply = fx.request("start", None);
    assert_eq!(reply.verb_type(), CscpType::Incomplete, "run id is required");

    let reply = fx.request("start", Some(Value::Int(17).assemble()));
    assert_eq!(reply.verb_type(), CscpType::Incomplete, "run id must be a string");

    let reply = fx.request("start", Some(Value::Str("bad run".into()).assemble()));
    assert_eq!(reply.verb_type(), CscpType::Incomplete, "run id grammar");

    assert_eq!(fx.satellite.state(), State::Orbit);
}

#[test]
fn run_roundtrip() {
    let mut fx = fixture(18309, TestSat::default());
    fx.transition("initialize", Some(empty_config()), State::Init);
    fx.transition("launch", None, State::Orbit);
    fx.transition("start", Some(Value::Str("run_1".into()).assemble()), State::Run);

    let reply = fx.request("get_run_id", None);
    assert_eq!(reply.verb(), "run_1");

    // initialize is not allowed mid-run
    let reply = fx.request("initialize", Some(empty_config()));
    assert_eq!(reply.verb_type(), CscpType::Invalid);

    fx.transition("stop", None, State::Orbit);
}

#[test]
fn failing_hook_reaches_error() {
    let mut fx = fixture(18310, TestSat { fail_initializing: true, reconfigurable: false });

    let reply = fx.request("initialize", Some(empty_config()));
    assert_eq!(reply.verb_type(), CscpType::Success, "transition is accepted");
    assert!(fx.wait_for_state(State::Error));

    let reply = fx.request("get_status", None);
    assert!(reply.verb().contains("device not found"));

    // ERROR accepts a fresh initialize attempt
    let reply = fx.request("initialize", Some(empty_config()));
    assert_eq!(reply.verb_type(), CscpType::Success);
}

#[test]
fn user_command_dispatch() {
    let mut fx = fixture(18311, TestSat::default());
    fx.satellite.commands().register2(
        "add",
        "Add two integers",
        Some([State::New, State::Init].into_iter().collect()),
        |a: i64, b: i64| Ok(a + b),
    );

    let mut args = List::new();
    args.push(2i64);
    args.push(3i64);
    let reply = fx.request("add", Some(args.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(reply.verb().contains("5"));
    let value = Value::disassemble(reply.payload().expect("payload")).expect("msgpack");
    assert_eq!(value, Value::Int(5));

    // arity mismatch
    let mut one = List::new();
    one.push(2i64);
    let reply = fx.request("add", Some(one.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Incomplete);

    // malformed argument payload
    let reply = fx.request("add", Some(vec![0xC1, 0xC1]));
    assert_eq!(reply.verb_type(), CscpType::Incomplete);

    // state gate
    fx.transition("initialize", Some(empty_config()), State::Init);
    fx.transition("launch", None, State::Orbit);
    let mut args = List::new();
    args.push(2i64);
    args.push(3i64);
    let reply = fx.request("add", Some(args.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Invalid);
}

#[test]
fn invalid_names_are_fatal() {
    let chirp = Manager::with_port(ANY, ANY, "ctrltest", "bad", 18312).expect("manager");
    let result = BaseSatellite::new(
        "Du mmy",
        "ok",
        chirp.handle(),
        Box::new(TestSat::default()),
        PayloadSpec::Plain,
    );
    assert!(result.is_err());

    let result = BaseSatellite::new(
        "Dummy",
        "with.dot",
        chirp.handle(),
        Box::new(TestSat::default()),
        PayloadSpec::Plain,
    );
    assert!(result.is_err());
}
