// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The CDTP receiver capability.
//!
//! A pull-socket pool over the `DATA` service, restricted to the senders
//! named in `_data_transmitters`. Message handling runs on the pool thread
//! and forwards to the user's [`ReceiverHooks`]; per-sender sequence
//! bookkeeping detects gaps (condition gains `INCOMPLETE`) and the
//! `stopping` drain appends synthetic `ABORTED` EORs for senders that fell
//! silent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::chirp::ChirpRef;
use crate::config::{Configuration, Dictionary, FromValue};
use crate::message::cdtp::{CdtpHeader, CdtpMessage};
use crate::message::Md5Hash;
use crate::pools::{BasePool, PoolCallbacks};
use crate::protocol::cdtp::{MessageType, RunCondition};
use crate::protocol::{is_valid_canonical_name, ServiceIdentifier};
use crate::satellite::SatelliteError;
use crate::transport::PullSocket;

const DEFAULT_EOR_TIMEOUT: Duration = Duration::from_secs(10);

/// User hooks of a receiving satellite, invoked on the pool thread.
pub trait ReceiverHooks: Send + 'static {
    /// A sender opened a run; `config` is its effective configuration.
    fn receive_bor(
        &mut self,
        header: &CdtpHeader,
        config: Configuration,
    ) -> Result<(), SatelliteError>;

    /// A payload message arrived.
    fn receive_data(&mut self, msg: CdtpMessage) -> Result<(), SatelliteError>;

    /// A sender closed its run; `metadata` carries the merged condition.
    fn receive_eor(
        &mut self,
        header: &CdtpHeader,
        metadata: Dictionary,
    ) -> Result<(), SatelliteError>;
}

struct SenderRun {
    next_seq: u64,
    bor_seen: bool,
    eor_seen: bool,
    condition: RunCondition,
    run_id: String,
}

struct RecvShared {
    hooks: Mutex<Box<dyn ReceiverHooks>>,
    /// Canonical names accepted as senders; compared by MD5 host id.
    transmitters: Mutex<Vec<Md5Hash>>,
    runs: Mutex<BTreeMap<String, SenderRun>>,
    /// First hook/bookkeeping failure, surfaced by `check_failures`.
    failure: Mutex<Option<String>>,
}

impl RecvShared {
    fn handle_message(&self, msg: CdtpMessage) {
        let sender = msg.header().sender().to_owned();
        let seq = msg.header().sequence();

        let result = match msg.header().message_type() {
            MessageType::Bor => self.handle_bor(&sender, seq, &msg),
            MessageType::Data => self.handle_data(&sender, seq, msg),
            MessageType::Eor => self.handle_eor(&sender, seq, &msg),
        };
        if let Err(e) = result {
            log::warn!("[cdtp] Handling message from {sender} failed: {e}");
            let mut failure = self.failure.lock();
            if failure.is_none() {
                *failure = Some(e.to_string());
            }
        }
    }

    fn handle_bor(
        &self,
        sender: &str,
        seq: u64,
        msg: &CdtpMessage,
    ) -> Result<(), SatelliteError> {
        log::debug!("[cdtp] Received BOR message from {sender}");
        let mut condition = RunCondition::GOOD;
        if seq != 0 {
            log::error!("[cdtp] BOR from {sender} carries sequence number {seq}, expected 0");
            condition |= RunCondition::INCOMPLETE;
        }
        let payload = msg
            .payload()
            .first()
            .ok_or_else(|| SatelliteError::Failed(format!("BOR from {sender} has no payload")))?;
        let dict = Dictionary::disassemble(payload)
            .map_err(|e| SatelliteError::Failed(format!("Undecodable BOR payload: {e}")))?;

        let run_id = msg
            .header()
            .tags()
            .get("run_id")
            .and_then(|v| String::from_value(v))
            .unwrap_or_default();
        self.runs.lock().insert(
            sender.to_owned(),
            SenderRun { next_seq: 1, bor_seen: true, eor_seen: false, condition, run_id },
        );

        self.hooks.lock().receive_bor(msg.header(), Configuration::from_dictionary(dict, true))
    }

    fn handle_data(&self, sender: &str, seq: u64, msg: CdtpMessage) -> Result<(), SatelliteError> {
        {
            let mut runs = self.runs.lock();
            let entry = runs.entry(sender.to_owned()).or_insert_with(|| {
                log::error!("[cdtp] DATA from {sender} without a BOR");
                SenderRun {
                    next_seq: seq,
                    bor_seen: false,
                    eor_seen: false,
                    condition: RunCondition::INCOMPLETE,
                    run_id: String::new(),
                }
            });
            if seq != entry.next_seq {
                log::warn!(
                    "[cdtp] Sequence gap from {sender}: received {seq}, expected {}",
                    entry.next_seq
                );
                entry.condition |= RunCondition::INCOMPLETE;
            }
            // Catch up so one gap is counted once
            entry.next_seq = seq + 1;
        }
        self.hooks.lock().receive_data(msg)
    }

    fn handle_eor(&self, sender: &str, seq: u64, msg: &CdtpMessage) -> Result<(), SatelliteError> {
        log::debug!("[cdtp] Received EOR message from {sender}");
        let payload = msg
            .payload()
            .first()
            .ok_or_else(|| SatelliteError::Failed(format!("EOR from {sender} has no payload")))?;
        let mut metadata = Dictionary::disassemble(payload)
            .map_err(|e| SatelliteError::Failed(format!("Undecodable EOR payload: {e}")))?;

        let local = {
            let mut runs = self.runs.lock();
            match runs.get_mut(sender) {
                Some(entry) => {
                    if seq != entry.next_seq {
                        log::warn!(
                            "[cdtp] EOR sequence from {sender}: received {seq}, expected {}",
                            entry.next_seq
                        );
                        entry.condition |= RunCondition::INCOMPLETE;
                    }
                    entry.eor_seen = true;
                    entry.condition
                }
                None => {
                    log::error!("[cdtp] EOR from {sender} without a BOR");
                    RunCondition::INCOMPLETE
                }
            }
        };

        // Merge the sender's reported condition with local observations
        let remote = metadata
            .get("condition_code")
            .and_then(|v| u64::from_value(v))
            .map(|bits| RunCondition::from_bits(bits as u8))
            .unwrap_or(RunCondition::GOOD);
        let merged = remote | local;
        metadata.insert("condition", merged.to_string());
        metadata.insert("condition_code", i64::from(merged.bits()));

        self.hooks.lock().receive_eor(msg.header(), metadata)
    }

    /// Senders that opened a run but have not closed it yet.
    fn pending_eors(&self) -> Vec<String> {
        self.runs
            .lock()
            .iter()
            .filter(|(_, run)| run.bor_seen && !run.eor_seen)
            .map(|(sender, _)| sender.clone())
            .collect()
    }

    /// Append a local EOR with `ABORTED` for a silent sender.
    fn synthesize_eor(&self, sender: &str) {
        let (seq, condition, run_id) = {
            let mut runs = self.runs.lock();
            let Some(entry) = runs.get_mut(sender) else {
                return;
            };
            entry.eor_seen = true;
            entry.condition |= RunCondition::ABORTED;
            (entry.next_seq, entry.condition, entry.run_id.clone())
        };
        log::error!("[cdtp] No EOR from {sender}, appending one with condition {condition}");

        let mut metadata = Dictionary::new();
        metadata.insert("condition", condition.to_string());
        metadata.insert("condition_code", i64::from(condition.bits()));
        metadata.insert("run_id", run_id);

        let header = CdtpHeader::new(sender, seq, MessageType::Eor);
        if let Err(e) = self.hooks.lock().receive_eor(&header, metadata) {
            log::warn!("[cdtp] receive_eor for synthetic EOR failed: {e}");
        }
    }
}

/// CDTP consumer restricted to configured transmitters.
pub struct DataReceiver {
    pool: BasePool<CdtpMessage, PullSocket>,
    shared: Arc<RecvShared>,
    chirp: ChirpRef,
    eor_timeout: Duration,
}

impl DataReceiver {
    pub fn new(chirp: ChirpRef, hooks: Box<dyn ReceiverHooks>) -> Self {
        let shared = Arc::new(RecvShared {
            hooks: Mutex::new(hooks),
            transmitters: Mutex::new(Vec::new()),
            runs: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
        });

        let on_message = Arc::clone(&shared);
        let filter = Arc::clone(&shared);
        let pool = BasePool::new(
            "cdtp",
            ServiceIdentifier::Data,
            chirp.clone(),
            PoolCallbacks {
                message: Box::new(move |msg: CdtpMessage| on_message.handle_message(msg)),
                should_connect: Box::new(move |service| {
                    filter.transmitters.lock().contains(&service.host_id)
                }),
                host_connected: Box::new(|_, _| {}),
                host_disconnected: Box::new(|_| {}),
                host_disposed: Box::new(|_| {}),
            },
        );

        DataReceiver { pool, shared, chirp, eor_timeout: DEFAULT_EOR_TIMEOUT }
    }

    /// Consume the framework keys of the initialize configuration.
    ///
    /// Every `_data_transmitters` entry must be a canonical name.
    pub fn initializing(&mut self, config: &mut Configuration) -> Result<(), SatelliteError> {
        let names: Vec<String> = config.get_array("_data_transmitters")?;
        for name in &names {
            if !is_valid_canonical_name(name) {
                return Err(SatelliteError::Config(crate::config::ConfigError::InvalidValue {
                    key: "_data_transmitters".into(),
                    reason: format!("{name:?} is not a canonical name"),
                }));
            }
        }
        self.eor_timeout = Duration::from_secs(config.get_or("_eor_timeout", 10u64)?);
        log::info!("[cdtp] Initialized to receive data from {names:?}");
        *self.shared.transmitters.lock() = names.iter().map(|n| Md5Hash::new(n)).collect();
        Ok(())
    }

    /// Reconfiguration: the transmitter list is frozen after initialize.
    pub fn reconfiguring(&mut self, partial: &Configuration) -> Result<(), SatelliteError> {
        if partial.has("_data_transmitters") {
            return Err(SatelliteError::Failed(
                "Data transmitters cannot be changed via reconfigure".into(),
            ));
        }
        if partial.has("_eor_timeout") {
            self.eor_timeout = Duration::from_secs(partial.get::<u64>("_eor_timeout")?);
        }
        Ok(())
    }

    /// Open the run: reset bookkeeping and start the pool.
    pub fn starting(&mut self) -> Result<(), SatelliteError> {
        self.shared.runs.lock().clear();
        *self.shared.failure.lock() = None;
        self.pool.start_pool();
        // In case an OFFER was missed while the pool was down
        self.chirp.send_request(ServiceIdentifier::Data);
        Ok(())
    }

    /// Surface pool or hook failures into the RUN hook.
    pub fn check_failures(&self) -> Result<(), SatelliteError> {
        self.pool
            .check_exception()
            .map_err(|e| SatelliteError::Failed(e.to_string()))?;
        if let Some(reason) = self.shared.failure.lock().take() {
            return Err(SatelliteError::Failed(reason));
        }
        Ok(())
    }

    /// Close the run: drain pending EORs, then stop the pool.
    ///
    /// Senders that never delivered an EOR get a synthetic one with
    /// condition `ABORTED`, and the satellite goes to ERROR.
    pub fn stopping(&mut self) -> Result<(), SatelliteError> {
        let missing = self.drain_eors();
        self.pool.stop_pool();
        if !missing.is_empty() {
            return Err(SatelliteError::Failed(format!(
                "Missing EOR from {} after {}s",
                missing.join(", "),
                self.eor_timeout.as_secs()
            )));
        }
        self.check_failures()
    }

    /// Interrupt path: drain what can be drained, then stop quietly.
    pub fn interrupting(&mut self) {
        let _ = self.drain_eors();
        self.pool.stop_pool();
    }

    /// Failure path: stop the pool immediately.
    pub fn failure(&mut self) {
        self.pool.stop_pool();
    }

    /// Wait up to the EOR timeout for every opened run to close; returns
    /// the senders that stayed silent (after synthesizing their EORs).
    fn drain_eors(&self) -> Vec<String> {
        let deadline = Instant::now() + self.eor_timeout;
        loop {
            let pending = self.shared.pending_eors();
            if pending.is_empty() {
                return Vec::new();
            }
            if Instant::now() >= deadline {
                for sender in &pending {
                    self.shared.synthesize_eor(sender);
                }
                return pending;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntoValue;

    struct CollectingHooks {
        bors: Arc<Mutex<Vec<String>>>,
        datas: Arc<Mutex<Vec<u64>>>,
        eors: Arc<Mutex<Vec<Dictionary>>>,
    }

    impl ReceiverHooks for CollectingHooks {
        fn receive_bor(
            &mut self,
            header: &CdtpHeader,
            _config: Configuration,
        ) -> Result<(), SatelliteError> {
            self.bors.lock().push(header.sender().to_owned());
            Ok(())
        }

        fn receive_data(&mut self, msg: CdtpMessage) -> Result<(), SatelliteError> {
            self.datas.lock().push(msg.header().sequence());
            Ok(())
        }

        fn receive_eor(
            &mut self,
            _header: &CdtpHeader,
            metadata: Dictionary,
        ) -> Result<(), SatelliteError> {
            self.eors.lock().push(metadata);
            Ok(())
        }
    }

    fn shared_with_hooks() -> (Arc<RecvShared>, Arc<Mutex<Vec<Dictionary>>>, Arc<Mutex<Vec<u64>>>) {
        let eors = Arc::new(Mutex::new(Vec::new()));
        let datas = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(RecvShared {
            hooks: Mutex::new(Box::new(CollectingHooks {
                bors: Arc::new(Mutex::new(Vec::new())),
                datas: Arc::clone(&datas),
                eors: Arc::clone(&eors),
            })),
            transmitters: Mutex::new(vec![Md5Hash::new("Dummy.t1")]),
            runs: Mutex::new(BTreeMap::new()),
            failure: Mutex::new(None),
        });
        (shared, eors, datas)
    }

    fn bor(sender: &str, seq: u64) -> CdtpMessage {
        let mut tags = Dictionary::new();
        tags.insert("run_id", "test");
        let mut msg =
            CdtpMessage::new(CdtpHeader::with_tags(sender, seq, MessageType::Bor, tags));
        msg.add_payload(Dictionary::new().assemble());
        msg
    }

    fn data(sender: &str, seq: u64) -> CdtpMessage {
        CdtpMessage::new(CdtpHeader::new(sender, seq, MessageType::Data))
    }

    fn eor(sender: &str, seq: u64, condition: RunCondition) -> CdtpMessage {
        let mut metadata = Dictionary::new();
        metadata.insert("condition", condition.to_string());
        metadata.insert("condition_code", i64::from(condition.bits()));
        let mut msg = CdtpMessage::new(CdtpHeader::new(sender, seq, MessageType::Eor));
        msg.add_payload(metadata.assemble());
        msg
    }

    #[test]
    fn clean_sequence_stays_good() {
        let (shared, eors, datas) = shared_with_hooks();
        shared.handle_message(bor("Dummy.t1", 0));
        for seq in 1..=4 {
            shared.handle_message(data("Dummy.t1", seq));
        }
        shared.handle_message(eor("Dummy.t1", 5, RunCondition::GOOD));

        assert_eq!(datas.lock().as_slice(), &[1, 2, 3, 4]);
        let eors = eors.lock();
        assert_eq!(eors.len(), 1);
        assert_eq!(eors[0].get("condition"), Some(&"GOOD".into_value()));
        assert!(shared.failure.lock().is_none());
    }

    #[test]
    fn sequence_gap_marks_incomplete() {
        let (shared, eors, _) = shared_with_hooks();
        shared.handle_message(bor("Dummy.t1", 0));
        shared.handle_message(data("Dummy.t1", 1));
        shared.handle_message(data("Dummy.t1", 3));
        shared.handle_message(eor("Dummy.t1", 4, RunCondition::GOOD));

        let eors = eors.lock();
        let code = u64::from_value(eors[0].get("condition_code").expect("code")).expect("u64");
        assert!(RunCondition::from_bits(code as u8).contains(RunCondition::INCOMPLETE));
    }

    #[test]
    fn remote_condition_is_merged() {
        let (shared, eors, _) = shared_with_hooks();
        shared.handle_message(bor("Dummy.t1", 0));
        shared
            .handle_message(eor("Dummy.t1", 1, RunCondition::TAINTED | RunCondition::INTERRUPTED));

        let eors = eors.lock();
        assert_eq!(
            eors[0].get("condition"),
            Some(&"TAINTED|INTERRUPTED".into_value())
        );
    }

    #[test]
    fn synthetic_eor_is_aborted() {
        let (shared, eors, _) = shared_with_hooks();
        shared.handle_message(bor("Dummy.t1", 0));
        assert_eq!(shared.pending_eors(), vec!["Dummy.t1".to_owned()]);

        shared.synthesize_eor("Dummy.t1");
        assert!(shared.pending_eors().is_empty());
        let eors = eors.lock();
        let code = u64::from_value(eors[0].get("condition_code").expect("code")).expect("u64");
        assert!(RunCondition::from_bits(code as u8).contains(RunCondition::ABORTED));
        assert_eq!(eors[0].get("run_id"), Some(&"test".into_value()));
    }

    #[test]
    fn nonzero_bor_sequence_marks_incomplete() {
        let (shared, eors, _) = shared_with_hooks();
        shared.handle_message(bor("Dummy.t1", 2));
        shared.handle_message(eor("Dummy.t1", 1, RunCondition::GOOD));

        let eors = eors.lock();
        let code = u64::from_value(eors[0].get("condition_code").expect("code")).expect("u64");
        assert!(RunCondition::from_bits(code as u8).contains(RunCondition::INCOMPLETE));
    }
}
