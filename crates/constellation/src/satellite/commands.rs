// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The user command registry.
//!
//! A registered command is a typed shim: it receives the generic argument
//! list from the wire, validates arity and per-position types, and forwards
//! to the typed callable. Errors are values, mapped to CSCP reply types at
//! the dispatch boundary.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use crate::config::value::FromValue;
use crate::config::{List, Value};
use crate::protocol::cscp::{StandardCommand, TransitionCommand};
use crate::protocol::State;

/// Failure of a user command invocation.
#[derive(Debug)]
pub enum CommandError {
    /// No such command; dispatch falls through to an UNKNOWN reply.
    Unknown(String),
    /// The command exists but is not allowed in the current state.
    InvalidState { command: String, state: State },
    /// Wrong number of arguments.
    WrongArity { command: String, expected: usize, received: usize },
    /// An argument did not convert to the declared type.
    BadArgument { command: String, index: usize, expected: &'static str, actual: &'static str },
    /// The callable itself failed.
    Failed(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unknown(command) => write!(f, "Command \"{command}\" is not known"),
            CommandError::InvalidState { command, state } => {
                write!(f, "Command \"{command}\" cannot be called in state {state}")
            }
            CommandError::WrongArity { command, expected, received } => write!(
                f,
                "Command \"{command}\" expects {expected} arguments, received {received}"
            ),
            CommandError::BadArgument { command, index, expected, actual } => write!(
                f,
                "Argument {index} of command \"{command}\" should be {expected}, received {actual}"
            ),
            CommandError::Failed(reason) => f.write_str(reason),
        }
    }
}

impl std::error::Error for CommandError {}

type Handler = Box<dyn Fn(&List) -> Result<Value, CommandError> + Send + Sync>;

/// One registered command.
pub struct UserCommand {
    pub description: String,
    /// States the command may be called in; `None` means any state.
    pub allowed_states: Option<BTreeSet<State>>,
    pub arity: usize,
    handler: Handler,
}

/// Registry of user commands, keyed by lower-case name.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Mutex<BTreeMap<String, UserCommand>>,
}

/// Unpack one positional argument of the declared type.
fn unpack<T: FromValue>(command: &str, args: &List, index: usize) -> Result<T, CommandError> {
    let value = args.get(index).ok_or_else(|| CommandError::WrongArity {
        command: command.to_owned(),
        expected: index + 1,
        received: args.len(),
    })?;
    T::from_value(value).ok_or_else(|| CommandError::BadArgument {
        command: command.to_owned(),
        index,
        expected: T::EXPECTED,
        actual: value.type_name(),
    })
}

impl CommandRegistry {
    pub fn new() -> Self {
        CommandRegistry::default()
    }

    /// Register a command taking the raw argument list.
    ///
    /// Returns false when the name is reserved or already taken.
    pub fn register_raw(
        &self,
        name: &str,
        description: impl Into<String>,
        allowed_states: Option<BTreeSet<State>>,
        arity: usize,
        handler: impl Fn(&List) -> Result<Value, CommandError> + Send + Sync + 'static,
    ) -> bool {
        let name = name.to_lowercase();
        if !crate::protocol::is_valid_name(&name) || is_reserved(&name) {
            log::warn!("[cscp] Rejecting user command with reserved or invalid name {name:?}");
            return false;
        }
        let mut commands = self.commands.lock();
        if commands.contains_key(&name) {
            return false;
        }
        commands.insert(
            name,
            UserCommand {
                description: description.into(),
                allowed_states,
                arity,
                handler: Box::new(handler),
            },
        );
        true
    }

    /// Register a niladic command.
    pub fn register0<R: crate::config::IntoValue>(
        &self,
        name: &str,
        description: impl Into<String>,
        allowed_states: Option<BTreeSet<State>>,
        callable: impl Fn() -> Result<R, String> + Send + Sync + 'static,
    ) -> bool {
        let owned = name.to_owned();
        self.register_raw(name, description, allowed_states, 0, move |args| {
            if !args.is_empty() {
                return Err(CommandError::WrongArity {
                    command: owned.clone(),
                    expected: 0,
                    received: args.len(),
                });
            }
            callable().map(|r| r.into_value()).map_err(CommandError::Failed)
        })
    }

    /// Register a one-argument command with typed unpacking.
    pub fn register1<A, R>(
        &self,
        name: &str,
        description: impl Into<String>,
        allowed_states: Option<BTreeSet<State>>,
        callable: impl Fn(A) -> Result<R, String> + Send + Sync + 'static,
    ) -> bool
    where
        A: FromValue,
        R: crate::config::IntoValue,
    {
        let owned = name.to_owned();
        self.register_raw(name, description, allowed_states, 1, move |args| {
            check_arity(&owned, args, 1)?;
            let a = unpack::<A>(&owned, args, 0)?;
            callable(a).map(|r| r.into_value()).map_err(CommandError::Failed)
        })
    }

    /// Register a two-argument command with typed unpacking.
    pub fn register2<A, B, R>(
        &self,
        name: &str,
        description: impl Into<String>,
        allowed_states: Option<BTreeSet<State>>,
        callable: impl Fn(A, B) -> Result<R, String> + Send + Sync + 'static,
    ) -> bool
    where
        A: FromValue,
        B: FromValue,
        R: crate::config::IntoValue,
    {
        let owned = name.to_owned();
        self.register_raw(name, description, allowed_states, 2, move |args| {
            check_arity(&owned, args, 2)?;
            let a = unpack::<A>(&owned, args, 0)?;
            let b = unpack::<B>(&owned, args, 1)?;
            callable(a, b).map(|r| r.into_value()).map_err(CommandError::Failed)
        })
    }

    /// Invoke a command, enforcing its state gate.
    pub fn call(&self, state: State, name: &str, args: &List) -> Result<Value, CommandError> {
        let name = name.to_lowercase();
        let commands = self.commands.lock();
        let command =
            commands.get(&name).ok_or_else(|| CommandError::Unknown(name.clone()))?;
        if let Some(allowed) = &command.allowed_states {
            if !allowed.contains(&state) {
                return Err(CommandError::InvalidState { command: name, state });
            }
        }
        (command.handler)(args)
    }

    /// Descriptions of all registered commands, for `get_commands`.
    pub fn describe(&self) -> Vec<(String, String)> {
        self.commands
            .lock()
            .iter()
            .map(|(name, cmd)| (name.clone(), cmd.description.clone()))
            .collect()
    }
}

fn check_arity(command: &str, args: &List, expected: usize) -> Result<(), CommandError> {
    if args.len() != expected {
        return Err(CommandError::WrongArity {
            command: command.to_owned(),
            expected,
            received: args.len(),
        });
    }
    Ok(())
}

/// Names taken by transitions and builtin queries.
fn is_reserved(name: &str) -> bool {
    TransitionCommand::from_verb(name).is_some() || StandardCommand::from_verb(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_add() -> CommandRegistry {
        let registry = CommandRegistry::new();
        let ok = registry.register2(
            "add",
            "Add two integers",
            Some(BTreeSet::from([State::Orbit, State::Init])),
            |a: i64, b: i64| Ok(a + b),
        );
        assert!(ok);
        registry
    }

    #[test]
    fn typed_invocation() {
        let registry = registry_with_add();
        let mut args = List::new();
        args.push(2i64);
        args.push(3i64);
        let result = registry.call(State::Orbit, "ADD", &args).expect("callable");
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn unknown_command_falls_through() {
        let registry = registry_with_add();
        assert!(matches!(
            registry.call(State::Orbit, "nope", &List::new()),
            Err(CommandError::Unknown(_))
        ));
    }

    #[test]
    fn state_gate() {
        let registry = registry_with_add();
        let mut args = List::new();
        args.push(1i64);
        args.push(1i64);
        assert!(matches!(
            registry.call(State::Run, "add", &args),
            Err(CommandError::InvalidState { .. })
        ));
    }

    #[test]
    fn arity_and_type_mismatches() {
        let registry = registry_with_add();
        let mut one = List::new();
        one.push(1i64);
        assert!(matches!(
            registry.call(State::Orbit, "add", &one),
            Err(CommandError::WrongArity { expected: 2, received: 1, .. })
        ));

        let mut wrong = List::new();
        wrong.push(1i64);
        wrong.push("two");
        assert!(matches!(
            registry.call(State::Orbit, "add", &wrong),
            Err(CommandError::BadArgument { index: 1, .. })
        ));
    }

    #[test]
    fn reserved_and_duplicate_names_rejected() {
        let registry = registry_with_add();
        assert!(!registry.register0("initialize", "nope", None, || Ok(0i64)));
        assert!(!registry.register0("get_state", "nope", None, || Ok(0i64)));
        assert!(!registry.register2("add", "dup", None, |a: i64, b: i64| Ok(a + b)));
    }

    #[test]
    fn callable_failure_maps_to_failed() {
        let registry = CommandRegistry::new();
        registry.register0("boom", "always fails", None, || Err::<i64, _>("kaput".into()));
        match registry.call(State::Orbit, "boom", &List::new()) {
            Err(CommandError::Failed(reason)) => assert_eq!(reason, "kaput"),
            other => unreachable!("expected Failed, got {other:?}"),
        }
    }
}
