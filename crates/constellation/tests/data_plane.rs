// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end CDTP runs: one transmitting and one receiving satellite in
//! the same group, driven over CSCP like a controller would.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use constellation::chirp::Manager;
use constellation::config::{Configuration, Dictionary, FromValue, Value};
use constellation::message::cdtp::{CdtpHeader, CdtpMessage};
use constellation::message::{CscpMessage, CscpType};
use constellation::protocol::cdtp::RunCondition;
use constellation::protocol::State;
use constellation::satellite::{
    BaseSatellite, PayloadSpec, ReceiverHooks, Satellite, SatelliteContext, SatelliteError,
};
use constellation::transport::ReqSocket;

const ANY: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Transmitter logic: sends one 4-byte payload per run, taints on demand.
struct Sender {
    sent: Arc<AtomicBool>,
    taint: Arc<AtomicBool>,
}

impl Satellite for Sender {
    fn starting(
        &mut self,
        _ctx: &mut SatelliteContext<'_>,
        _run_id: &str,
    ) -> Result<(), SatelliteError> {
        self.sent.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn running(
        &mut self,
        ctx: &mut SatelliteContext<'_>,
        token: &constellation::CancellationToken,
    ) -> Result<(), SatelliteError> {
        let tx = ctx.transmitter().expect("transmitter mounted");
        let mut msg = tx.new_data_message(1);
        msg.add_payload(vec![1, 2, 3, 4]);
        msg.header_mut().tags_mut().insert("test", 1i64);
        tx.send_data_message(&msg)?;
        self.sent.store(true, Ordering::Relaxed);

        while !token.is_cancelled() {
            if self.taint.swap(false, Ordering::Relaxed) {
                ctx.transmitter().expect("transmitter mounted").mark_run_tainted();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }
}

/// Receiver hooks collecting everything for inspection.
#[derive(Default)]
struct Collected {
    bor_configs: Mutex<Vec<Configuration>>,
    data: Mutex<Vec<CdtpMessage>>,
    eors: Mutex<Vec<Dictionary>>,
}

struct Collector {
    collected: Arc<Collected>,
}

impl ReceiverHooks for Collector {
    fn receive_bor(
        &mut self,
        _header: &CdtpHeader,
        config: Configuration,
    ) -> Result<(), SatelliteError> {
        self.collected.bor_configs.lock().push(config);
        Ok(())
    }

    fn receive_data(&mut self, msg: CdtpMessage) -> Result<(), SatelliteError> {
        self.collected.data.lock().push(msg);
        Ok(())
    }

    fn receive_eor(
        &mut self,
        _header: &CdtpHeader,
        metadata: Dictionary,
    ) -> Result<(), SatelliteError> {
        self.collected.eors.lock().push(metadata);
        Ok(())
    }
}

struct ReceiverLogic;

impl Satellite for ReceiverLogic {
    fn supports_reconfigure(&self) -> bool {
        true
    }
}

struct Swarm {
    _chirp_t: Manager,
    _chirp_r: Manager,
    transmitter: BaseSatellite,
    receiver: BaseSatellite,
    ctrl_t: ReqSocket,
    ctrl_r: ReqSocket,
    collected: Arc<Collected>,
    sent: Arc<AtomicBool>,
    taint: Arc<AtomicBool>,
}

fn swarm(port: u16) -> Swarm {
    let group = format!("data{port}");
    let mut chirp_t = Manager::with_port(ANY, ANY, &group, "Dummy.t1", port).expect("manager");
    chirp_t.start();
    let mut chirp_r = Manager::with_port(ANY, ANY, &group, "Dummy.r1", port).expect("manager");
    chirp_r.start();

    let sent = Arc::new(AtomicBool::new(false));
    let taint = Arc::new(AtomicBool::new(false));
    let transmitter = BaseSatellite::new(
        "Dummy",
        "t1",
        chirp_t.handle(),
        Box::new(Sender { sent: Arc::clone(&sent), taint: Arc::clone(&taint) }),
        PayloadSpec::Transmitter,
    )
    .expect("transmitter");

    let collected = Arc::new(Collected::default());
    let receiver = BaseSatellite::new(
        "Dummy",
        "r1",
        chirp_r.handle(),
        Box::new(ReceiverLogic),
        PayloadSpec::Receiver(Box::new(Collector { collected: Arc::clone(&collected) })),
    )
    .expect("receiver");

    let ctrl_t = ReqSocket::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, transmitter.port())))
        .expect("connect");
    let ctrl_r = ReqSocket::connect(SocketAddr::from((Ipv4Addr::LOCALHOST, receiver.port())))
        .expect("connect");

    Swarm {
        _chirp_t: chirp_t,
        _chirp_r: chirp_r,
        transmitter,
        receiver,
        ctrl_t,
        ctrl_r,
        collected,
        sent,
        taint,
    }
}

fn request(ctrl: &mut ReqSocket, verb: &str, payload: Option<Vec<u8>>) -> CscpMessage {
    let mut msg = CscpMessage::request("ctrl.test", verb);
    if let Some(payload) = payload {
        msg = msg.with_payload(payload);
    }
    let reply = ctrl.request(&msg.assemble(), Duration::from_secs(5)).expect("reply");
    CscpMessage::disassemble(&reply).expect("decodable reply")
}

fn wait_for(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

fn wait_for_state(satellite: &BaseSatellite, state: State) -> bool {
    wait_for(|| satellite.state() == state, Duration::from_secs(5))
}

fn transmitter_config() -> Dictionary {
    let mut config = Dictionary::new();
    config.insert("_bor_timeout", 2u64);
    config.insert("_eor_timeout", 2u64);
    config.insert("_data_timeout", 2u64);
    config.insert("_data_license", "PDDL-1.0");
    config
}

fn receiver_config() -> Dictionary {
    let mut config = Dictionary::new();
    config.insert("_data_transmitters", vec!["Dummy.t1"]);
    config.insert("_eor_timeout", 2u64);
    config
}

fn start_run(swarm: &mut Swarm, run_id: &str) {
    let reply = request(
        &mut swarm.ctrl_t,
        "initialize",
        Some(transmitter_config().assemble()),
    );
    assert_eq!(reply.verb_type(), CscpType::Success, "{}", reply.verb());
    let reply =
        request(&mut swarm.ctrl_r, "initialize", Some(receiver_config().assemble()));
    assert_eq!(reply.verb_type(), CscpType::Success, "{}", reply.verb());
    assert!(wait_for_state(&swarm.transmitter, State::Init));
    assert!(wait_for_state(&swarm.receiver, State::Init));

    request(&mut swarm.ctrl_t, "launch", None);
    request(&mut swarm.ctrl_r, "launch", None);
    assert!(wait_for_state(&swarm.transmitter, State::Orbit));
    assert!(wait_for_state(&swarm.receiver, State::Orbit));

    // The receiver goes first so its pull socket is connected when the
    // transmitter's BOR send starts its countdown
    let run = Value::Str(run_id.into()).assemble();
    let reply = request(&mut swarm.ctrl_r, "start", Some(run.clone()));
    assert_eq!(reply.verb_type(), CscpType::Success, "{}", reply.verb());
    assert!(wait_for_state(&swarm.receiver, State::Run));

    let reply = request(&mut swarm.ctrl_t, "start", Some(run));
    assert_eq!(reply.verb_type(), CscpType::Success, "{}", reply.verb());
    assert!(wait_for_state(&swarm.transmitter, State::Run));
}

#[test]
fn clean_run() {
    let mut swarm = swarm(18401);
    start_run(&mut swarm, "test");

    let sent = Arc::clone(&swarm.sent);
    assert!(wait_for(|| sent.load(Ordering::Relaxed), Duration::from_secs(5)));
    {
        let collected = Arc::clone(&swarm.collected);
        assert!(wait_for(|| !collected.data.lock().is_empty(), Duration::from_secs(5)));
    }

    // BOR carries the transmitter's effective configuration
    {
        let bors = swarm.collected.bor_configs.lock();
        assert_eq!(bors.len(), 1);
        assert_eq!(bors[0].get::<u64>("_eor_timeout").expect("key"), 2);
    }

    // one DATA message, one payload frame, header tag test=1
    {
        let data = swarm.collected.data.lock();
        assert_eq!(data.len(), 1);
        assert_eq!(data[0].header().sequence(), 1);
        assert_eq!(data[0].payload().len(), 1);
        assert_eq!(data[0].payload()[0], vec![1, 2, 3, 4]);
        assert_eq!(data[0].header().tags().get("test"), Some(&Value::Int(1)));
    }

    // orderly stop: transmitter first so its EOR is on the wire before the
    // receiver's drain begins
    let reply = request(&mut swarm.ctrl_t, "stop", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(wait_for_state(&swarm.transmitter, State::Orbit));

    let reply = request(&mut swarm.ctrl_r, "stop", None);
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(wait_for_state(&swarm.receiver, State::Orbit));

    let eors = swarm.collected.eors.lock();
    assert_eq!(eors.len(), 1);
    let eor = &eors[0];
    assert_eq!(eor.get("run_id"), Some(&Value::Str("test".into())));
    assert_eq!(eor.get("condition"), Some(&Value::Str("GOOD".into())));
    assert_eq!(
        eor.get("condition_code").and_then(u64::from_value),
        Some(u64::from(RunCondition::GOOD.bits()))
    );
    assert_eq!(eor.get("license"), Some(&Value::Str("PDDL-1.0".into())));
    assert_eq!(eor.get("version"), Some(&Value::Str(constellation::VERSION.into())));
    assert_eq!(
        eor.get("version_full"),
        Some(&Value::Str(constellation::VERSION_FULL.into()))
    );
}

#[test]
fn tainted_and_interrupted_run() {
    let mut swarm = swarm(18402);
    start_run(&mut swarm, "taintedrun");

    let sent = Arc::clone(&swarm.sent);
    assert!(wait_for(|| sent.load(Ordering::Relaxed), Duration::from_secs(5)));

    // taint, let the RUN loop pick it up, then interrupt
    swarm.taint.store(true, Ordering::Relaxed);
    let taint = Arc::clone(&swarm.taint);
    assert!(wait_for(|| !taint.load(Ordering::Relaxed), Duration::from_secs(5)));
    swarm.transmitter.interrupt("operator interrupt");

    assert!(wait_for_state(&swarm.transmitter, State::Safe));

    // the receiver sees the EOR with the merged condition
    {
        let collected = Arc::clone(&swarm.collected);
        assert!(wait_for(|| !collected.eors.lock().is_empty(), Duration::from_secs(5)));
    }
    let expected = RunCondition::TAINTED | RunCondition::INTERRUPTED;
    {
        let eors = swarm.collected.eors.lock();
        assert_eq!(
            eors[0].get("condition"),
            Some(&Value::Str("TAINTED|INTERRUPTED".into()))
        );
        assert_eq!(
            eors[0].get("condition_code").and_then(u64::from_value),
            Some(u64::from(expected.bits()))
        );
    }

    // observing the transmitter's SAFE state interrupts the receiver too
    assert!(wait_for(
        || matches!(swarm.receiver.state(), State::Interrupting | State::Safe),
        Duration::from_secs(10)
    ));
}

#[test]
fn receiver_requires_transmitter_list() {
    let mut swarm = swarm(18403);

    // _data_transmitters is missing: initializing must fail
    let mut config = Dictionary::new();
    config.insert("_eor_timeout", 1u64);
    config.insert("_allow_overwriting", true);
    let reply = request(&mut swarm.ctrl_r, "initialize", Some(config.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Success, "transition is accepted");
    assert!(wait_for_state(&swarm.receiver, State::Error));

    // reconfigure cannot fix it from ERROR
    let mut partial = Dictionary::new();
    partial.insert("_data_transmitters", vec!["Dummy.t1"]);
    let reply = request(&mut swarm.ctrl_r, "reconfigure", Some(partial.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Invalid);
    assert_eq!(swarm.receiver.state(), State::Error);
}

#[test]
fn reconfigure_may_not_change_transmitters() {
    let mut swarm = swarm(18404);

    let reply =
        request(&mut swarm.ctrl_r, "initialize", Some(receiver_config().assemble()));
    assert_eq!(reply.verb_type(), CscpType::Success);
    assert!(wait_for_state(&swarm.receiver, State::Init));
    request(&mut swarm.ctrl_r, "launch", None);
    assert!(wait_for_state(&swarm.receiver, State::Orbit));

    let mut partial = Dictionary::new();
    partial.insert("_data_transmitters", vec!["Dummy.t2"]);
    let reply = request(&mut swarm.ctrl_r, "reconfigure", Some(partial.assemble()));
    assert_eq!(reply.verb_type(), CscpType::Success, "transition is accepted");
    assert!(wait_for_state(&swarm.receiver, State::Error));
}

#[test]
fn missing_eor_aborts_the_run() {
    let mut swarm = swarm(18405);
    start_run(&mut swarm, "abruptrun");

    let sent = Arc::clone(&swarm.sent);
    assert!(wait_for(|| sent.load(Ordering::Relaxed), Duration::from_secs(5)));
    {
        let collected = Arc::clone(&swarm.collected);
        assert!(wait_for(|| !collected.data.lock().is_empty(), Duration::from_secs(5)));
    }

    // Abandon the transmitter mid-run: it never stops, so no EOR arrives.
    // (Leaking it keeps its sockets open, the realistic wedged-process
    // shape; dropping would run the orderly interrupt path instead.)
    drop(swarm.ctrl_t);
    std::mem::forget(swarm.transmitter);

    let reply = request(&mut swarm.ctrl_r, "stop", None);
    assert_eq!(reply.verb_type(), CscpType::Success, "transition is accepted");
    assert!(wait_for_state(&swarm.receiver, State::Error));

    // the synthetic EOR carries ABORTED
    let eors = swarm.collected.eors.lock();
    assert_eq!(eors.len(), 1);
    let code = eors[0].get("condition_code").and_then(u64::from_value).expect("code");
    assert!(RunCondition::from_bits(code as u8).contains(RunCondition::ABORTED));
}
