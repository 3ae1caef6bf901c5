// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CSCP definitions: the satellite state set and command grammar.
//!
//! States come in two flavors: steady states (upper-case on the wire) in
//! which a satellite idles, and transitional states (lower-case) during
//! which a lifecycle hook is executing on the FSM worker. Transitional
//! states always exit on their own, either to the nominal steady state or
//! to `Error`.

/// Operational state of a satellite.
///
/// The discriminant travels as a single byte in `get_state` replies and in
/// CHP heartbeats. The high nibble groups states by lifecycle phase so that
/// a controller can order them without a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum State {
    /// Freshly constructed, not yet initialized.
    New = 0x10,
    /// `initialize` hook executing.
    Initializing = 0x12,
    /// Initialized, configuration stored.
    Init = 0x20,
    /// `launch` hook executing.
    Launching = 0x23,
    /// Ready for runs.
    Orbit = 0x30,
    /// `land` hook executing.
    Landing = 0x32,
    /// `reconfigure` hook executing.
    Reconfiguring = 0x33,
    /// `start` hook executing.
    Starting = 0x34,
    /// A data run is in progress; the `running` hook holds the worker.
    Run = 0x40,
    /// `stop` hook executing.
    Stopping = 0x43,
    /// Interrupt handling executing.
    Interrupting = 0x0E,
    /// Fallback state after an interrupt completed.
    Safe = 0xE0,
    /// A hook failed or a failure was requested.
    Error = 0xF0,
}

impl State {
    /// Decode a state byte as received in heartbeats or `get_state` payloads.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x10 => Some(State::New),
            0x12 => Some(State::Initializing),
            0x20 => Some(State::Init),
            0x23 => Some(State::Launching),
            0x30 => Some(State::Orbit),
            0x32 => Some(State::Landing),
            0x33 => Some(State::Reconfiguring),
            0x34 => Some(State::Starting),
            0x40 => Some(State::Run),
            0x43 => Some(State::Stopping),
            0x0E => Some(State::Interrupting),
            0xE0 => Some(State::Safe),
            0xF0 => Some(State::Error),
            _ => None,
        }
    }

    /// Wire spelling: steady states upper-case, transitional states lower-case.
    pub fn name(&self) -> &'static str {
        match self {
            State::New => "NEW",
            State::Initializing => "initializing",
            State::Init => "INIT",
            State::Launching => "launching",
            State::Orbit => "ORBIT",
            State::Landing => "landing",
            State::Reconfiguring => "reconfiguring",
            State::Starting => "starting",
            State::Run => "RUN",
            State::Stopping => "stopping",
            State::Interrupting => "interrupting",
            State::Safe => "SAFE",
            State::Error => "ERROR",
        }
    }

    /// True for states in which no hook is executing.
    pub fn is_steady(&self) -> bool {
        matches!(
            self,
            State::New | State::Init | State::Orbit | State::Run | State::Safe | State::Error
        )
    }

    /// True while a lifecycle hook is executing on the FSM worker.
    pub fn is_transitional(&self) -> bool {
        !self.is_steady()
    }

    /// True if a remote peer in this state should be treated as failed.
    pub fn indicates_failure(&self) -> bool {
        matches!(self, State::Safe | State::Error)
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// `shutdown` is only honored from these states.
pub fn is_shutdown_allowed(state: State) -> bool {
    matches!(state, State::New | State::Init | State::Safe | State::Error)
}

/// Transition commands a controller can issue over CSCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCommand {
    Initialize,
    Launch,
    Land,
    Reconfigure,
    Start,
    Stop,
}

impl TransitionCommand {
    /// Parse a lower-cased CSCP verb.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "initialize" => Some(TransitionCommand::Initialize),
            "launch" => Some(TransitionCommand::Launch),
            "land" => Some(TransitionCommand::Land),
            "reconfigure" => Some(TransitionCommand::Reconfigure),
            "start" => Some(TransitionCommand::Start),
            "stop" => Some(TransitionCommand::Stop),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransitionCommand::Initialize => "initialize",
            TransitionCommand::Launch => "launch",
            TransitionCommand::Land => "land",
            TransitionCommand::Reconfigure => "reconfigure",
            TransitionCommand::Start => "start",
            TransitionCommand::Stop => "stop",
        }
    }
}

impl std::fmt::Display for TransitionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs driving the FSM: operator commands plus internal completions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Initialize,
    Initialized,
    Launch,
    Launched,
    Land,
    Landed,
    Reconfigure,
    Reconfigured,
    Start,
    Started,
    Stop,
    Stopped,
    Interrupt,
    Interrupted,
    Failure,
}

impl From<TransitionCommand> for Transition {
    fn from(cmd: TransitionCommand) -> Self {
        match cmd {
            TransitionCommand::Initialize => Transition::Initialize,
            TransitionCommand::Launch => Transition::Launch,
            TransitionCommand::Land => Transition::Land,
            TransitionCommand::Reconfigure => Transition::Reconfigure,
            TransitionCommand::Start => Transition::Start,
            TransitionCommand::Stop => Transition::Stop,
        }
    }
}

/// The FSM transition table as a pure function.
///
/// Returns the state entered when `transition` fires in `state`, or `None`
/// when the transition is not allowed there. `Failure` is accepted from
/// every state; `Interrupt` from every state in which something can be
/// running (transitional states, `Orbit` and `Run`).
pub fn find_transition(state: State, transition: Transition) -> Option<State> {
    use State::*;
    use Transition::*;

    if transition == Failure {
        return Some(Error);
    }
    if transition == Interrupt {
        return match state {
            Orbit | Run | Initializing | Launching | Landing | Reconfiguring | Starting
            | Stopping => Some(Interrupting),
            _ => None,
        };
    }

    match (state, transition) {
        (New, Initialize) => Some(Initializing),
        (Initializing, Initialized) => Some(Init),
        (Init, Initialize) => Some(Initializing),
        (Init, Launch) => Some(Launching),
        (Launching, Launched) => Some(Orbit),
        (Orbit, Land) => Some(Landing),
        (Orbit, Reconfigure) => Some(Reconfiguring),
        (Orbit, Start) => Some(Starting),
        (Landing, Landed) => Some(Init),
        (Reconfiguring, Reconfigured) => Some(Orbit),
        (Starting, Started) => Some(Run),
        (Run, Stop) => Some(Stopping),
        (Stopping, Stopped) => Some(Orbit),
        (Interrupting, Interrupted) => Some(Safe),
        (Safe, Initialize) => Some(Initializing),
        (Error, Initialize) => Some(Initializing),
        _ => None,
    }
}

/// Built-in non-transition commands every satellite answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardCommand {
    GetName,
    GetVersion,
    GetCommands,
    GetState,
    GetStatus,
    GetConfig,
    GetRunId,
    Shutdown,
}

impl StandardCommand {
    /// Parse a lower-cased CSCP verb.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb {
            "get_name" => Some(StandardCommand::GetName),
            "get_version" => Some(StandardCommand::GetVersion),
            "get_commands" => Some(StandardCommand::GetCommands),
            "get_state" => Some(StandardCommand::GetState),
            "get_status" => Some(StandardCommand::GetStatus),
            "get_config" => Some(StandardCommand::GetConfig),
            "get_run_id" => Some(StandardCommand::GetRunId),
            "shutdown" => Some(StandardCommand::Shutdown),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [State; 13] = [
        State::New,
        State::Initializing,
        State::Init,
        State::Launching,
        State::Orbit,
        State::Landing,
        State::Reconfiguring,
        State::Starting,
        State::Run,
        State::Stopping,
        State::Interrupting,
        State::Safe,
        State::Error,
    ];

    #[test]
    fn state_bytes_roundtrip() {
        for state in ALL_STATES {
            assert_eq!(State::from_byte(state as u8), Some(state), "{state}");
        }
        assert_eq!(State::from_byte(0x00), None);
    }

    #[test]
    fn steady_and_transitional_partition() {
        let steady: Vec<_> = ALL_STATES.iter().filter(|s| s.is_steady()).collect();
        assert_eq!(steady.len(), 6);
        for state in ALL_STATES {
            assert_ne!(state.is_steady(), state.is_transitional());
            // Wire spelling mirrors the flavor
            let upper = state.name().chars().all(|c| c.is_ascii_uppercase());
            assert_eq!(upper, state.is_steady(), "{state}");
        }
    }

    #[test]
    fn shutdown_allowed_set() {
        for state in ALL_STATES {
            let expected = matches!(
                state,
                State::New | State::Init | State::Safe | State::Error
            );
            assert_eq!(is_shutdown_allowed(state), expected, "{state}");
        }
    }

    #[test]
    fn nominal_walk_through_table() {
        let mut state = State::New;
        for (transition, expected) in [
            (Transition::Initialize, State::Initializing),
            (Transition::Initialized, State::Init),
            (Transition::Launch, State::Launching),
            (Transition::Launched, State::Orbit),
            (Transition::Start, State::Starting),
            (Transition::Started, State::Run),
            (Transition::Stop, State::Stopping),
            (Transition::Stopped, State::Orbit),
            (Transition::Land, State::Landing),
            (Transition::Landed, State::Init),
        ] {
            state = find_transition(state, transition).expect("nominal transition allowed");
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn failure_reaches_error_from_everywhere() {
        for state in ALL_STATES {
            assert_eq!(find_transition(state, Transition::Failure), Some(State::Error));
        }
    }

    #[test]
    fn interrupt_only_preempts_active_states() {
        assert_eq!(find_transition(State::Run, Transition::Interrupt), Some(State::Interrupting));
        assert_eq!(find_transition(State::Orbit, Transition::Interrupt), Some(State::Interrupting));
        assert_eq!(
            find_transition(State::Starting, Transition::Interrupt),
            Some(State::Interrupting)
        );
        assert_eq!(find_transition(State::New, Transition::Interrupt), None);
        assert_eq!(find_transition(State::Safe, Transition::Interrupt), None);
        assert_eq!(find_transition(State::Error, Transition::Interrupt), None);
    }

    #[test]
    fn reconfigure_only_from_orbit() {
        for state in ALL_STATES {
            let target = find_transition(state, Transition::Reconfigure);
            if state == State::Orbit {
                assert_eq!(target, Some(State::Reconfiguring));
            } else {
                assert_eq!(target, None, "{state}");
            }
        }
    }
}
