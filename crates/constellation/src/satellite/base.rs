// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The base satellite: CSCP loop, FSM wiring and service registration.
//!
//! `BaseSatellite` mounts user logic and an optional data-plane capability,
//! binds the CSCP reply socket, announces its services over CHIRP and runs
//! the command dispatcher:
//!
//! 1. non-REQUEST messages are answered with an ERROR reply,
//! 2. transition commands drive the FSM,
//! 3. builtin queries are answered in place,
//! 4. user commands come from the registry,
//! 5. anything else is UNKNOWN.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::chirp::ChirpRef;
use crate::config::{Configuration, Dictionary, Group, List, Usage, Value};
use crate::heartbeat::HeartbeatManager;
use crate::message::{CscpMessage, CscpType, MessageHeader};
use crate::monitoring::MonitoringSender;
use crate::protocol::cscp::{
    is_shutdown_allowed, StandardCommand, State, Transition, TransitionCommand,
};
use crate::protocol::{is_valid_name, Level, ServiceIdentifier};
use crate::satellite::commands::{CommandError, CommandRegistry};
use crate::satellite::receiver::{DataReceiver, ReceiverHooks};
use crate::satellite::transmitter::DataTransmitter;
use crate::satellite::{Fsm, Payload, Satellite, SatelliteContext, SatelliteError};
use crate::telemetry::MetricsManager;
use crate::transport::{NetworkError, RepSocket};

/// CSCP receive timeout; keeps shutdown responsive.
const CSCP_RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Data-plane flavor selected at construction.
pub enum PayloadSpec {
    /// No data plane.
    Plain,
    /// Mount a CDTP transmitter.
    Transmitter,
    /// Mount a CDTP receiver with the given hooks.
    Receiver(Box<dyn ReceiverHooks>),
}

/// State owned by the FSM worker.
struct ExecState {
    satellite: Box<dyn Satellite>,
    payload: Payload,
    config: Configuration,
}

/// One queued lifecycle job for the FSM worker.
enum Job {
    Initialize(Configuration),
    Launch,
    Land,
    Reconfigure(Configuration),
    Start(String),
    Stop,
    Interrupt(String),
}

impl Job {
    /// Transitional state this job executes in.
    fn running_state(&self) -> State {
        match self {
            Job::Initialize(_) => State::Initializing,
            Job::Launch => State::Launching,
            Job::Land => State::Landing,
            Job::Reconfigure(_) => State::Reconfiguring,
            Job::Start(_) => State::Starting,
            Job::Stop => State::Stopping,
            Job::Interrupt(_) => State::Interrupting,
        }
    }

    fn completion(&self) -> (Transition, &'static str) {
        match self {
            Job::Initialize(_) => (Transition::Initialized, "Satellite initialized"),
            Job::Launch => (Transition::Launched, "Satellite launched"),
            Job::Land => (Transition::Landed, "Satellite landed"),
            Job::Reconfigure(_) => (Transition::Reconfigured, "Satellite reconfigured"),
            Job::Start(_) => (Transition::Started, "Run started"),
            Job::Stop => (Transition::Stopped, "Run stopped"),
            Job::Interrupt(_) => (Transition::Interrupted, "Satellite interrupted"),
        }
    }
}

struct Shared {
    canonical: String,
    chirp: ChirpRef,
    fsm: Fsm,
    exec: Mutex<ExecState>,
    /// Snapshot of the stored (used) configuration for `get_config`.
    config_dict: Mutex<Dictionary>,
    run_id: Mutex<String>,
    status: ArcSwap<String>,
    commands: CommandRegistry,
    monitoring: MonitoringSender,
    heartbeat: OnceLock<HeartbeatManager>,
    support_reconfigure: bool,
    stop: AtomicBool,
}

/// A satellite process: user logic plus the shared runtime.
pub struct BaseSatellite {
    shared: Arc<Shared>,
    metrics: Arc<MetricsManager>,
    cscp_thread: Option<JoinHandle<()>>,
    cscp_port: u16,
    registered_services: Vec<(ServiceIdentifier, u16)>,
}

impl BaseSatellite {
    /// Construct and start a satellite.
    ///
    /// Fails on invalid type or name components (the canonical-name
    /// grammar is `[A-Za-z0-9_]+ "." [A-Za-z0-9_]+`).
    pub fn new(
        type_name: &str,
        name: &str,
        chirp: ChirpRef,
        satellite: Box<dyn Satellite>,
        payload_spec: PayloadSpec,
    ) -> Result<Self, SatelliteError> {
        if !is_valid_name(type_name) || !is_valid_name(name) {
            return Err(SatelliteError::Failed("Satellite name is invalid".into()));
        }
        let canonical = format!("{type_name}.{name}");

        let rep = RepSocket::bind().map_err(io_error)?;
        let cscp_port = rep.port();

        let monitoring = MonitoringSender::new(canonical.clone()).map_err(io_error)?;
        let metrics = Arc::new(MetricsManager::new(
            canonical.clone(),
            Arc::new({
                let sender = monitoring.clone();
                move |msg| sender.send_message(msg)
            }),
        ));
        monitoring.set_stat_inventory_provider(Arc::new({
            let metrics = Arc::clone(&metrics);
            move || metrics.describe()
        }));

        let mut registered_services = vec![
            (ServiceIdentifier::Control, cscp_port),
            (ServiceIdentifier::Monitoring, monitoring.port()),
        ];

        let payload = match payload_spec {
            PayloadSpec::Plain => Payload::None,
            PayloadSpec::Transmitter => {
                let tx = DataTransmitter::new(canonical.clone()).map_err(io_error)?;
                registered_services.push((ServiceIdentifier::Data, tx.port()));
                Payload::Transmitter(tx)
            }
            PayloadSpec::Receiver(hooks) => {
                Payload::Receiver(DataReceiver::new(chirp.clone(), hooks))
            }
        };

        let support_reconfigure = satellite.supports_reconfigure();
        let shared = Arc::new(Shared {
            canonical: canonical.clone(),
            chirp: chirp.clone(),
            fsm: Fsm::new(),
            exec: Mutex::new(ExecState { satellite, payload, config: Configuration::new() }),
            config_dict: Mutex::new(Dictionary::new()),
            run_id: Mutex::new(String::new()),
            status: ArcSwap::from_pointee(String::new()),
            commands: CommandRegistry::new(),
            monitoring,
            heartbeat: OnceLock::new(),
            support_reconfigure,
            stop: AtomicBool::new(false),
        });

        // The heartbeat manager reads state and raises interrupts through
        // weak handles, so a dropped satellite degrades to no-ops.
        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let state_weak = weak.clone();
        let status_weak = weak.clone();
        let interrupt_weak = weak.clone();
        let heartbeat = HeartbeatManager::new(
            canonical.clone(),
            chirp.clone(),
            Arc::new(move || {
                state_weak.upgrade().map(|s| s.fsm.state()).unwrap_or(State::New)
            }),
            Arc::new(move || {
                status_weak.upgrade().map(|s| s.status.load().as_ref().clone()).filter(|s| !s.is_empty())
            }),
            Arc::new(move |reason: &str| {
                if let Some(shared) = interrupt_weak.upgrade() {
                    shared.request_interrupt(reason);
                }
            }),
        )
        .map_err(io_error)?;
        registered_services.push((ServiceIdentifier::Heartbeat, heartbeat.port()));
        let _ = shared.heartbeat.set(heartbeat);

        // Peers learn of state changes without waiting out the interval
        let extrasystole_weak = weak.clone();
        shared.fsm.register_state_callback("extrasystoles", move |_| {
            if let Some(shared) = extrasystole_weak.upgrade() {
                if let Some(hb) = shared.heartbeat.get() {
                    hb.send_extrasystole();
                }
            }
        });

        for (service, port) in &registered_services {
            chirp.register_service(*service, *port);
        }
        log::info!("[cscp] {canonical} listening for commands on port {cscp_port}");

        let cscp_thread = {
            let shared = Arc::clone(&shared);
            Some(std::thread::spawn(move || cscp_loop(shared, rep)))
        };

        Ok(BaseSatellite { shared, metrics, cscp_thread, cscp_port, registered_services })
    }

    /// Canonical name, `type.name`.
    pub fn canonical_name(&self) -> &str {
        &self.shared.canonical
    }

    /// Port of the CSCP reply socket.
    pub fn port(&self) -> u16 {
        self.cscp_port
    }

    /// Current FSM state.
    pub fn state(&self) -> State {
        self.shared.fsm.state()
    }

    /// Current status line.
    pub fn status(&self) -> String {
        self.shared.status.load().as_ref().clone()
    }

    /// Current or last run identifier.
    pub fn run_id(&self) -> String {
        self.shared.run_id.lock().clone()
    }

    /// The user-command registry.
    pub fn commands(&self) -> &CommandRegistry {
        &self.shared.commands
    }

    /// The metrics front-end publishing over CMDP.
    pub fn metrics(&self) -> &Arc<MetricsManager> {
        &self.metrics
    }

    /// The monitoring (CMDP) publisher.
    pub fn monitoring(&self) -> &MonitoringSender {
        &self.shared.monitoring
    }

    /// Raise a local interrupt, as the heartbeat manager does on remote
    /// failures. A no-op when nothing is running.
    pub fn interrupt(&self, reason: &str) {
        self.shared.request_interrupt(reason);
    }

    /// Request shutdown: stops the CSCP loop and interrupts any activity.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// True once `shutdown` was accepted or `terminate` called.
    pub fn is_terminated(&self) -> bool {
        self.shared.stop.load(Ordering::Relaxed)
    }

    /// Block until the satellite shuts down.
    pub fn join(&mut self) {
        if let Some(handle) = self.cscp_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BaseSatellite {
    fn drop(&mut self) {
        self.shared.terminate();
        self.join();
        self.shared.fsm.join_worker();
        self.shared.monitoring.close();
        for (service, port) in &self.registered_services {
            self.shared.chirp.unregister_service(*service, *port);
        }
    }
}

fn io_error(e: std::io::Error) -> SatelliteError {
    SatelliteError::Network(NetworkError::Io(e))
}

impl Shared {
    fn set_status(&self, status: impl Into<String>) {
        self.status.store(Arc::new(status.into()));
    }

    fn terminate(self: &Arc<Self>) {
        self.stop.store(true, Ordering::Relaxed);
        // Goes to SAFE when something is in flight; a no-op otherwise
        self.request_interrupt("Shutting down satellite");
    }

    /// Consume framework keys that apply outside the data plane.
    fn apply_internal_config(&self, config: &Configuration) -> Result<(), SatelliteError> {
        if config.has("_heartbeat_interval") {
            let secs = config.get::<u64>("_heartbeat_interval")?;
            if let Some(hb) = self.heartbeat.get() {
                hb.update_interval(Duration::from_secs(secs));
            }
        }
        // Read for bookkeeping; honored by the user's file-writing code
        if config.has("_allow_overwriting") {
            let _ = config.get::<bool>("_allow_overwriting")?;
        }
        Ok(())
    }

    /// Persist a consumed configuration, warning about untouched keys.
    ///
    /// Only used keys survive into the stored configuration.
    fn persist_config(&self, stored: &mut Configuration, config: Configuration) {
        if warn_unused(&config) {
            *stored = Configuration::from_dictionary(
                config.get_dictionary(Group::All, Usage::Used),
                true,
            );
        } else {
            *stored = config;
        }
        log::info!(
            "[satellite] Configuration: {} settings {}",
            stored.size(Group::User, Usage::Any),
            stored.get_dictionary(Group::User, Usage::Any)
        );
        *self.config_dict.lock() = stored.get_dictionary(Group::All, Usage::Used);
    }

    /// Handle a transition command from the CSCP dispatcher.
    fn request_transition(
        self: &Arc<Self>,
        cmd: TransitionCommand,
        payload: Option<&[u8]>,
    ) -> (CscpType, String) {
        if cmd == TransitionCommand::Reconfigure && !self.support_reconfigure {
            return (
                CscpType::NotImplemented,
                "Satellite does not support reconfiguration".into(),
            );
        }

        let job = match build_job(cmd, payload) {
            Ok(job) => job,
            Err(reason) => return (CscpType::Incomplete, reason),
        };

        match self.fsm.begin(Transition::from(cmd)) {
            Ok((previous, prev_worker)) => {
                self.spawn_worker(job, previous, prev_worker);
                (CscpType::Success, format!("Transition {cmd} is being initiated"))
            }
            Err(current) => (
                CscpType::Invalid,
                format!("Transition {cmd} not allowed from {current} state"),
            ),
        }
    }

    /// Raise a local interrupt (heartbeat observations, shutdown).
    fn request_interrupt(self: &Arc<Self>, reason: &str) {
        match self.fsm.begin(Transition::Interrupt) {
            Ok((previous, prev_worker)) => {
                log::warn!("[fsm] Interrupting: {reason}");
                self.set_status(format!("Interrupted: {reason}"));
                self.spawn_worker(Job::Interrupt(reason.to_owned()), previous, prev_worker);
            }
            Err(current) => {
                log::debug!("[fsm] Interrupt requested in state {current}, nothing to do");
            }
        }
    }

    fn spawn_worker(self: &Arc<Self>, job: Job, previous: State, prev_worker: Option<JoinHandle<()>>) {
        let shared = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            if let Some(prev) = prev_worker {
                let _ = prev.join();
            }
            // An interrupt or failure may have preempted this job between
            // its begin() and now
            if shared.fsm.state() != job.running_state() {
                return;
            }
            shared.execute(job, previous);
        });
        self.fsm.set_worker(handle);
    }

    /// Execute one lifecycle job on the FSM worker.
    fn execute(self: &Arc<Self>, job: Job, previous: State) {
        let (completion, success_status) = job.completion();
        let is_start = matches!(job, Job::Start(_));

        let result = self.run_hooks(job, previous);
        match result {
            Ok(()) => {
                if self.fsm.complete(completion).is_some() {
                    self.set_status(success_status);
                    self.monitoring.send_log(Level::Status, Some("fsm"), success_status);
                }
            }
            Err(e) => {
                self.fail(e, previous);
                return;
            }
        }

        // Entering RUN continues on this worker with the running hook
        if is_start && self.fsm.state() == State::Run {
            let token = self.fsm.run_token();
            let run_result = {
                let exec = &mut *self.exec.lock();
                let ExecState { satellite, payload, .. } = exec;
                let mut ctx = SatelliteContext { payload };
                satellite.running(&mut ctx, &token)
            };
            if let Err(e) = run_result {
                self.fail(e, State::Run);
            }
        }
    }

    fn run_hooks(&self, job: Job, previous: State) -> Result<(), SatelliteError> {
        let exec = &mut *self.exec.lock();
        let ExecState { satellite, payload, config: stored } = exec;
        let mut ctx = SatelliteContext { payload };

        match job {
            Job::Initialize(mut config) => {
                self.apply_internal_config(&config)?;
                satellite.initializing(&mut ctx, &mut config)?;
                match ctx.payload {
                    Payload::Receiver(rx) => rx.initializing(&mut config)?,
                    Payload::Transmitter(tx) => tx.initializing(&mut config)?,
                    Payload::None => {}
                }
                self.persist_config(stored, config);
            }
            Job::Launch => satellite.launching(&mut ctx)?,
            Job::Land => satellite.landing(&mut ctx)?,
            Job::Reconfigure(partial) => {
                self.apply_internal_config(&partial)?;
                satellite.reconfiguring(&mut ctx, &partial)?;
                match ctx.payload {
                    Payload::Receiver(rx) => rx.reconfiguring(&partial)?,
                    Payload::Transmitter(tx) => tx.reconfiguring(&partial)?,
                    Payload::None => {}
                }
                warn_unused(&partial);
                stored.update(&partial);
                *self.config_dict.lock() = stored.get_dictionary(Group::All, Usage::Used);
            }
            Job::Start(run_id) => {
                satellite.starting(&mut ctx, &run_id)?;
                match ctx.payload {
                    Payload::Receiver(rx) => rx.starting()?,
                    Payload::Transmitter(tx) => tx.starting(&run_id, stored)?,
                    Payload::None => {}
                }
                *self.run_id.lock() = run_id;
            }
            Job::Stop => {
                // The receiver must drain EORs before anything else stops
                if let Payload::Receiver(rx) = ctx.payload {
                    rx.stopping()?;
                }
                satellite.stopping(&mut ctx)?;
                if let Payload::Transmitter(tx) = ctx.payload {
                    tx.stopping()?;
                }
            }
            Job::Interrupt(_) => {
                if let Payload::Receiver(rx) = ctx.payload {
                    log::debug!("[fsm] Interrupting: draining receiver");
                    rx.interrupting();
                }
                if let Payload::Transmitter(tx) = ctx.payload {
                    tx.interrupting();
                }
                satellite.interrupting(&mut ctx, previous)?;
            }
        }
        Ok(())
    }

    /// Hook failure: flip to ERROR and run last-resort cleanup.
    fn fail(self: &Arc<Self>, error: SatelliteError, previous: State) {
        let message = error.to_string();
        log::error!("[fsm] Transition failed: {message}");
        self.set_status(message.clone());
        self.monitoring.send_log(Level::Critical, Some("fsm"), &message);
        if self.fsm.complete(Transition::Failure).is_some() {
            let exec = &mut *self.exec.lock();
            let ExecState { satellite, payload, .. } = exec;
            match payload {
                Payload::Receiver(rx) => rx.failure(),
                Payload::Transmitter(tx) => tx.failure(),
                Payload::None => {}
            }
            let mut ctx = SatelliteContext { payload };
            satellite.failure(&mut ctx, previous);
        }
    }
}

/// Log the keys of a configuration that were never read.
///
/// Returns whether there were any.
fn warn_unused(config: &Configuration) -> bool {
    let unused = config.get_dictionary(Group::All, Usage::Unused);
    if unused.is_empty() {
        return false;
    }
    let keys: Vec<&str> = unused.keys().map(String::as_str).collect();
    log::warn!(
        "[satellite] {} keys of the configuration were not used: {}",
        unused.len(),
        keys.join(", ")
    );
    true
}

/// Validate and unpack the payload of a transition command.
fn build_job(cmd: TransitionCommand, payload: Option<&[u8]>) -> Result<Job, String> {
    match cmd {
        TransitionCommand::Initialize | TransitionCommand::Reconfigure => {
            let bytes = payload
                .ok_or_else(|| format!("Transition {cmd} requires a configuration payload"))?;
            let dict = Dictionary::disassemble(bytes)
                .map_err(|e| format!("Transition {cmd} received an invalid payload: {e}"))?;
            let config = Configuration::from_dictionary(dict, false);
            Ok(match cmd {
                TransitionCommand::Initialize => Job::Initialize(config),
                _ => Job::Reconfigure(config),
            })
        }
        TransitionCommand::Start => {
            let bytes =
                payload.ok_or_else(|| "Transition start requires a run identifier".to_owned())?;
            let value = Value::disassemble(bytes)
                .map_err(|e| format!("Transition start received an invalid payload: {e}"))?;
            let run_id = match value {
                Value::Str(s) => s,
                other => {
                    return Err(format!(
                        "Run identifier should be a string, received {}",
                        other.type_name()
                    ))
                }
            };
            if run_id.is_empty()
                || !run_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
            {
                return Err(format!("Run identifier {run_id:?} is not valid"));
            }
            Ok(Job::Start(run_id))
        }
        TransitionCommand::Launch => Ok(Job::Launch),
        TransitionCommand::Land => Ok(Job::Land),
        TransitionCommand::Stop => Ok(Job::Stop),
    }
}

/// The CSCP request/reply loop.
fn cscp_loop(shared: Arc<Shared>, mut rep: RepSocket) {
    while !shared.stop.load(Ordering::Relaxed) {
        let frames = match rep.recv(CSCP_RECV_TIMEOUT) {
            Ok(Some(frames)) => frames,
            Ok(None) => continue,
            Err(e) => {
                log::error!("[cscp] Receive failed: {e}");
                log::error!("[cscp] Stopping command receiver, no further commands accepted");
                return;
            }
        };

        let reply = match CscpMessage::disassemble(&frames) {
            Ok(msg) => {
                log::debug!(
                    "[cscp] Received {} message with verb {:?}{} from {}",
                    msg.verb_type(),
                    msg.verb(),
                    if msg.has_payload() { " and a payload" } else { "" },
                    msg.header().sender()
                );
                if msg.verb_type() != CscpType::Request {
                    log::warn!("[cscp] Received message that is not REQUEST type - ignoring");
                    Reply::plain(CscpType::Error, "Can only handle CSCP messages with REQUEST type")
                } else {
                    handle_request(&shared, &msg)
                }
            }
            Err(e) => {
                log::warn!("[cscp] {e}");
                Reply::plain(CscpType::Error, e.to_string())
            }
        };

        send_reply(&shared, &mut rep, reply);
    }
}

struct Reply {
    verb_type: CscpType,
    message: String,
    payload: Option<Vec<u8>>,
    tags: Dictionary,
}

impl Reply {
    fn plain(verb_type: CscpType, message: impl Into<String>) -> Self {
        Reply { verb_type, message: message.into(), payload: None, tags: Dictionary::new() }
    }

    fn with_payload(verb_type: CscpType, message: impl Into<String>, payload: Vec<u8>) -> Self {
        Reply { verb_type, message: message.into(), payload: Some(payload), tags: Dictionary::new() }
    }
}

fn send_reply(shared: &Arc<Shared>, rep: &mut RepSocket, reply: Reply) {
    let header = MessageHeader::with_tags(shared.canonical.clone(), reply.tags);
    let mut msg = CscpMessage::new(header, reply.verb_type, reply.message);
    if let Some(payload) = reply.payload {
        msg = msg.with_payload(payload);
    }
    if let Err(e) = rep.send(&msg.assemble()) {
        log::warn!("[cscp] Failed to send reply: {e}");
    }
}

fn handle_request(shared: &Arc<Shared>, msg: &CscpMessage) -> Reply {
    let verb = msg.verb().to_lowercase();

    // 1. transition commands
    if let Some(cmd) = TransitionCommand::from_verb(&verb) {
        let (verb_type, message) = shared.request_transition(cmd, msg.payload());
        return Reply::plain(verb_type, message);
    }

    // 2. builtin queries
    if let Some(cmd) = StandardCommand::from_verb(&verb) {
        return handle_standard_command(shared, cmd);
    }

    // 3. user commands
    match handle_user_command(shared, &verb, msg.payload()) {
        Some(reply) => reply,
        // 4. nothing matched
        None => {
            log::warn!("[cscp] Received unknown command {verb:?} - ignoring");
            Reply::plain(CscpType::Unknown, format!("Command \"{verb}\" is not known"))
        }
    }
}

fn handle_standard_command(shared: &Arc<Shared>, cmd: StandardCommand) -> Reply {
    match cmd {
        StandardCommand::GetName => Reply::plain(CscpType::Success, shared.canonical.clone()),
        StandardCommand::GetVersion => Reply::plain(CscpType::Success, crate::VERSION_FULL),
        StandardCommand::GetCommands => {
            let mut dict = Dictionary::new();
            dict.insert(
                "initialize",
                "Initialize satellite (payload: config as flat msgpack dict with string keys)",
            );
            dict.insert("launch", "Launch satellite");
            dict.insert("land", "Land satellite");
            if shared.support_reconfigure {
                dict.insert(
                    "reconfigure",
                    "Reconfigure satellite (payload: partial config as flat msgpack dict)",
                );
            }
            dict.insert("start", "Start new run (payload: run identifier as msgpack string)");
            dict.insert("stop", "Stop run");
            dict.insert("shutdown", "Shutdown satellite");
            dict.insert("get_name", "Get canonical name of satellite");
            dict.insert("get_version", "Get version of satellite");
            dict.insert("get_commands", "Get commands supported by satellite");
            dict.insert("get_state", "Get state of satellite");
            dict.insert("get_status", "Get status of satellite");
            dict.insert("get_config", "Get config of satellite");
            dict.insert("get_run_id", "Current or last run identifier");
            for (name, description) in shared.commands.describe() {
                dict.insert(name, description);
            }
            Reply::with_payload(
                CscpType::Success,
                format!("{} commands known, list attached in payload", dict.len()),
                dict.assemble(),
            )
        }
        StandardCommand::GetState => {
            let state = shared.fsm.state();
            let mut reply = Reply::with_payload(
                CscpType::Success,
                state.name(),
                Value::Int(i64::from(state as u8)).assemble(),
            );
            reply.tags.insert("last_changed", shared.fsm.last_changed());
            reply
        }
        StandardCommand::GetStatus => {
            Reply::plain(CscpType::Success, shared.status.load().as_ref().clone())
        }
        StandardCommand::GetConfig => {
            let dict = shared.config_dict.lock().clone();
            Reply::with_payload(
                CscpType::Success,
                format!("{} configuration keys, dictionary attached in payload", dict.len()),
                dict.assemble(),
            )
        }
        StandardCommand::GetRunId => {
            Reply::plain(CscpType::Success, shared.run_id.lock().clone())
        }
        StandardCommand::Shutdown => {
            let state = shared.fsm.state();
            if is_shutdown_allowed(state) {
                shared.terminate();
                Reply::plain(CscpType::Success, "Shutting down satellite")
            } else {
                Reply::plain(
                    CscpType::Invalid,
                    format!("Satellite cannot be shut down from current state {state}"),
                )
            }
        }
    }
}

fn handle_user_command(shared: &Arc<Shared>, verb: &str, payload: Option<&[u8]>) -> Option<Reply> {
    log::debug!("[cscp] Attempting to handle command {verb:?} as user command");

    let args = match payload {
        Some(bytes) => match List::disassemble(bytes) {
            Ok(args) => args,
            Err(_) => {
                return Some(Reply::plain(
                    CscpType::Incomplete,
                    "Could not convert command payload to argument list",
                ))
            }
        },
        None => List::new(),
    };

    match shared.commands.call(shared.fsm.state(), verb, &args) {
        Ok(value) => {
            let rendered = value.to_string();
            let payload = match value {
                Value::Nil => None,
                other => Some(other.assemble()),
            };
            let mut reply =
                Reply::plain(CscpType::Success, format!("Command returned: {rendered}"));
            reply.payload = payload;
            Some(reply)
        }
        Err(CommandError::Unknown(_)) => None,
        Err(e @ CommandError::InvalidState { .. }) => {
            Some(Reply::plain(CscpType::Invalid, e.to_string()))
        }
        Err(e) => Some(Reply::plain(CscpType::Incomplete, e.to_string())),
    }
}
