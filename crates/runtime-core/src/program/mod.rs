//! Static program tables: event, state, function, and machine declarations.
//!
//! A program is produced once (normally by a code generator, in tests by the
//! [`builder`] surface), validated by [`Program::initialize`], and shared
//! read-only by every machine instance for the life of the process.

/// Fluent construction surface for program tables.
pub mod builder;
/// Packed event-index sets.
pub mod event_set;

use std::collections::HashSet;

use value_model::ValueType;

use crate::dispatch::MachineFn;
use crate::fault::RuntimeError;

pub use event_set::EventSet;

/// Dense index of an event declaration within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u32);

impl EventId {
    /// Wraps a raw event declaration index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index, usable for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw index as stored in event values.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Index of a state within its owning machine declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateId(u32);

impl StateId {
    /// Wraps a raw state index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index, usable for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw index as reported in machine-state snapshots.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Index of a function within its owning machine declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunId(u32);

impl FunId {
    /// Wraps a raw function index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index, usable for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Compile-time symbolic machine name, resolved through the link map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolicName(u32);

impl SymbolicName {
    /// Wraps a raw symbolic-name index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// The raw index, usable for table lookups.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An event declaration.
#[derive(Debug, Clone)]
pub struct EventDecl {
    /// Event name, used in logs and error reports.
    pub name: String,
    /// Declared payload type, used to pack multi-argument sends.
    pub payload_type: ValueType,
    /// Bound on unconsumed copies of this event in any single queue.
    /// `None` means unbounded.
    pub max_instances: Option<u32>,
    pub(crate) decl_index: u32,
}

impl EventDecl {
    /// Declares an event.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        payload_type: ValueType,
        max_instances: Option<u32>,
    ) -> Self {
        Self {
            name: name.into(),
            payload_type,
            max_instances,
            decl_index: 0,
        }
    }

    /// The dense index assigned by [`Program::initialize`].
    #[must_use]
    pub const fn decl_index(&self) -> u32 {
        self.decl_index
    }
}

/// An opaque externally defined type declaration.
#[derive(Debug, Clone)]
pub struct ForeignTypeDecl {
    /// Foreign type name.
    pub name: String,
    pub(crate) decl_index: u32,
}

impl ForeignTypeDecl {
    /// Declares a foreign type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            decl_index: 0,
        }
    }

    /// The dense index assigned by [`Program::initialize`].
    #[must_use]
    pub const fn decl_index(&self) -> u32 {
        self.decl_index
    }
}

/// A machine-level variable declaration.
#[derive(Debug, Clone)]
pub struct VarDecl {
    /// Variable name.
    pub name: String,
    /// Declared variable type.
    pub var_type: ValueType,
}

/// One arm of a receive point: an allowed event and its handler.
#[derive(Debug, Clone, Copy)]
pub struct CaseDecl {
    /// Event consumed by this arm.
    pub trigger: EventId,
    /// Handler run with the matched event's payload.
    pub fun: FunId,
}

/// A receive point inside a function body.
#[derive(Debug, Clone)]
pub struct ReceiveDecl {
    /// Identifier the function body passes when suspending here.
    pub receive_index: u16,
    /// The arms of this receive, in declaration order.
    pub cases: Vec<CaseDecl>,
    pub(crate) case_set: EventSet,
}

impl ReceiveDecl {
    /// Declares a receive point with its arms.
    #[must_use]
    pub fn new(receive_index: u16, cases: Vec<CaseDecl>) -> Self {
        Self {
            receive_index,
            cases,
            case_set: EventSet::new(),
        }
    }

    /// The packed set of events this receive accepts.
    #[must_use]
    pub const fn case_set(&self) -> &EventSet {
        &self.case_set
    }
}

/// A function declaration: an opaque host callback plus its frame layout and
/// receive points.
#[derive(Debug, Clone)]
pub struct FunDecl {
    /// Function name; `None` for anonymous entry/exit/handler bodies.
    pub name: Option<String>,
    /// The host callback implementing the body.
    pub implementation: MachineFn,
    /// Locals frame size, including slots reused by nested scopes.
    pub max_locals: usize,
    /// Payload type for anonymous functions, used to pack creation payloads.
    pub payload_type: Option<ValueType>,
    /// Tuple layout of the named locals (nested-scope slots excluded).
    pub locals_type: ValueType,
    /// Receive points appearing in the body.
    pub receives: Vec<ReceiveDecl>,
}

impl FunDecl {
    /// Declares a function with empty frame and no receive points.
    #[must_use]
    pub const fn new(implementation: MachineFn) -> Self {
        Self {
            name: None,
            implementation,
            max_locals: 0,
            payload_type: None,
            locals_type: ValueType::Tuple(Vec::new()),
            receives: Vec::new(),
        }
    }

    /// Sets the function name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the locals frame: named layout plus total slot count.
    #[must_use]
    pub fn with_locals(mut self, locals_type: ValueType, max_locals: usize) -> Self {
        self.locals_type = locals_type;
        self.max_locals = max_locals;
        self
    }

    /// Sets the declared payload type.
    #[must_use]
    pub fn with_payload_type(mut self, payload_type: ValueType) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    /// Adds a receive point.
    #[must_use]
    pub fn with_receive(mut self, receive_index: u16, cases: Vec<CaseDecl>) -> Self {
        self.receives.push(ReceiveDecl::new(receive_index, cases));
        self
    }

    /// Looks up a receive point by the index the body suspends with.
    #[must_use]
    pub fn receive(&self, receive_index: u16) -> Option<&ReceiveDecl> {
        self.receives
            .iter()
            .find(|decl| decl.receive_index == receive_index)
    }
}

/// Whether a transition replaces the current state or stacks on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Leave the current state and enter the destination.
    Goto,
    /// Record the current state on the stack, then enter the destination.
    Push,
}

/// A state transition declaration.
#[derive(Debug, Clone, Copy)]
pub struct TransitionDecl {
    /// Event that triggers this transition.
    pub trigger: EventId,
    /// Destination state within the owning machine.
    pub dest: StateId,
    /// Goto or push semantics.
    pub kind: TransitionKind,
    /// Optional function run between the exit and entry functions.
    pub trans_fun: Option<FunId>,
}

/// A do-handler declaration: an event handled in place without leaving the
/// state.
#[derive(Debug, Clone, Copy)]
pub struct DoDecl {
    /// Event that triggers this handler.
    pub trigger: EventId,
    /// Handler run with the event's payload.
    pub do_fun: FunId,
}

/// A state declaration.
#[derive(Debug, Clone)]
pub struct StateDecl {
    /// State name, used in logs and error reports.
    pub name: String,
    /// Function run on entry, with the triggering payload.
    pub entry_fun: FunId,
    /// Function run on exit; exit functions never see events.
    pub exit_fun: FunId,
    /// Outgoing transitions in declaration order; first match wins.
    pub transitions: Vec<TransitionDecl>,
    /// Do-handlers in declaration order; first match wins.
    pub dos: Vec<DoDecl>,
    /// Events kept in the queue and skipped while this state is current.
    pub defers: EventSet,
    pub(crate) trans_set: EventSet,
    pub(crate) do_set: EventSet,
}

impl StateDecl {
    /// The packed set of transition trigger events.
    #[must_use]
    pub const fn transition_triggers(&self) -> &EventSet {
        &self.trans_set
    }

    /// The packed set of do-handler trigger events.
    #[must_use]
    pub const fn do_triggers(&self) -> &EventSet {
        &self.do_set
    }

    /// First declared transition for the event, if any.
    #[must_use]
    pub fn transition_on(&self, event: EventId) -> Option<&TransitionDecl> {
        self.transitions.iter().find(|t| t.trigger == event)
    }

    /// First declared do-handler for the event, if any.
    #[must_use]
    pub fn do_on(&self, event: EventId) -> Option<&DoDecl> {
        self.dos.iter().find(|d| d.trigger == event)
    }
}

/// A machine declaration.
#[derive(Debug, Clone)]
pub struct MachineDecl {
    /// Machine name, used in logs and error reports.
    pub name: String,
    /// States in declaration order.
    pub states: Vec<StateDecl>,
    /// Function table referenced by states, transitions, and receives.
    pub funs: Vec<FunDecl>,
    /// Index of the initial state.
    pub init_state: StateId,
    /// Bound on the instance queue length. `None` means unbounded.
    pub max_queue_size: Option<usize>,
    /// Machine-level variable declarations.
    pub vars: Vec<VarDecl>,
    pub(crate) decl_index: u32,
}

impl MachineDecl {
    /// The dense index assigned by [`Program::initialize`].
    #[must_use]
    pub const fn decl_index(&self) -> u32 {
        self.decl_index
    }

    /// Looks up a state declaration.
    #[must_use]
    pub fn state(&self, state: StateId) -> &StateDecl {
        &self.states[state.index()]
    }

    /// Looks up a function declaration.
    #[must_use]
    pub fn fun(&self, fun: FunId) -> &FunDecl {
        &self.funs[fun.index()]
    }
}

/// A complete program: declarations plus the linking layer.
#[derive(Debug)]
pub struct Program {
    pub(crate) events: Vec<EventDecl>,
    pub(crate) machines: Vec<MachineDecl>,
    pub(crate) foreign_types: Vec<ForeignTypeDecl>,
    pub(crate) link_map: Vec<Vec<Option<SymbolicName>>>,
    pub(crate) machine_def_map: Vec<Option<usize>>,
    pub(crate) initialized: bool,
}

impl Program {
    /// Assembles raw tables as a code generator emits them.
    ///
    /// The result carries no declaration indices and has not been checked;
    /// it must pass through [`Program::initialize`] before a process can
    /// start over it. [`builder::ProgramBuilder`] wraps both steps.
    #[must_use]
    pub fn new(
        events: Vec<EventDecl>,
        machines: Vec<MachineDecl>,
        foreign_types: Vec<ForeignTypeDecl>,
        link_map: Vec<Vec<Option<SymbolicName>>>,
        machine_def_map: Vec<Option<usize>>,
    ) -> Self {
        Self {
            events,
            machines,
            foreign_types,
            link_map,
            machine_def_map,
            initialized: false,
        }
    }

    /// The event declarations in dense index order.
    #[must_use]
    pub fn events(&self) -> &[EventDecl] {
        &self.events
    }

    /// The machine declarations in dense index order.
    #[must_use]
    pub fn machines(&self) -> &[MachineDecl] {
        &self.machines
    }

    /// The foreign type declarations in dense index order.
    #[must_use]
    pub fn foreign_types(&self) -> &[ForeignTypeDecl] {
        &self.foreign_types
    }

    /// Number of symbolic names covered by the linking layer.
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.machine_def_map.len()
    }

    /// True once [`Program::initialize`] completed.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Resolves a child symbolic name relative to a parent symbolic name.
    #[must_use]
    pub fn resolve_link(&self, parent: SymbolicName, child: SymbolicName) -> Option<SymbolicName> {
        *self.link_map.get(parent.index())?.get(child.index())?
    }

    /// Resolves a symbolic name to a concrete machine declaration index.
    #[must_use]
    pub fn resolve_definition(&self, name: SymbolicName) -> Option<usize> {
        *self.machine_def_map.get(name.index())?
    }

    pub(crate) fn event_name(&self, event: EventId) -> &str {
        &self.events[event.index()].name
    }

    /// Scans the program, assigning dense declaration indices and validating
    /// cross-table coherence.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidProgramTable`] when any declaration
    /// references an out-of-range event, state, or function, when the linking
    /// layer is not rectangular over the symbolic-name space, or when a
    /// machine has no states.
    #[allow(clippy::cast_possible_truncation, clippy::too_many_lines)]
    pub fn initialize(mut self) -> Result<Self, RuntimeError> {
        let n_events = self.events.len();
        let n_machines = self.machines.len();
        let n_symbols = self.machine_def_map.len();

        if self.link_map.len() != n_symbols {
            return Err(invalid("link map does not cover the symbolic-name space"));
        }
        for row in &self.link_map {
            if row.len() != n_symbols {
                return Err(invalid("link map is not rectangular"));
            }
            for target in row.iter().flatten() {
                if target.index() >= n_symbols {
                    return Err(invalid("link map target outside the symbolic-name space"));
                }
            }
        }
        for target in self.machine_def_map.iter().flatten() {
            if *target >= n_machines {
                return Err(invalid("machine definition map targets a missing machine"));
            }
        }

        for (index, event) in self.events.iter_mut().enumerate() {
            event.decl_index = index as u32;
        }
        for (index, foreign) in self.foreign_types.iter_mut().enumerate() {
            foreign.decl_index = index as u32;
        }

        for (index, machine) in self.machines.iter_mut().enumerate() {
            machine.decl_index = index as u32;
            let n_states = machine.states.len();
            let n_funs = machine.funs.len();

            if n_states == 0 {
                return Err(invalid(format!("machine `{}` has no states", machine.name)));
            }
            if machine.init_state.index() >= n_states {
                return Err(invalid(format!(
                    "machine `{}` initial state out of range",
                    machine.name
                )));
            }

            for fun in &mut machine.funs {
                if let Some(arity) = fun.locals_type.tuple_arity() {
                    if arity > fun.max_locals {
                        return Err(invalid("locals tuple wider than the locals frame"));
                    }
                } else {
                    return Err(invalid("function locals type must be a tuple"));
                }

                let mut seen_points = HashSet::new();
                for receive in &mut fun.receives {
                    if !seen_points.insert(receive.receive_index) {
                        return Err(invalid("duplicate receive index in one function"));
                    }
                    if receive.cases.is_empty() {
                        return Err(invalid("receive point with no cases"));
                    }
                    let mut seen_triggers = HashSet::new();
                    for case in &receive.cases {
                        if case.trigger.index() >= n_events {
                            return Err(invalid("receive case trigger out of range"));
                        }
                        if case.fun.index() >= n_funs {
                            return Err(invalid("receive case handler out of range"));
                        }
                        if !seen_triggers.insert(case.trigger) {
                            return Err(invalid("duplicate trigger in one receive case set"));
                        }
                    }
                    receive.case_set =
                        EventSet::from_events(receive.cases.iter().map(|case| case.trigger));
                }
            }

            for state in &mut machine.states {
                if state.entry_fun.index() >= n_funs || state.exit_fun.index() >= n_funs {
                    return Err(invalid(format!(
                        "state `{}` references a missing function",
                        state.name
                    )));
                }
                for transition in &state.transitions {
                    if transition.trigger.index() >= n_events {
                        return Err(invalid("transition trigger out of range"));
                    }
                    if transition.dest.index() >= n_states {
                        return Err(invalid("transition destination out of range"));
                    }
                    if transition.trans_fun.is_some_and(|f| f.index() >= n_funs) {
                        return Err(invalid("transition function out of range"));
                    }
                }
                for handler in &state.dos {
                    if handler.trigger.index() >= n_events {
                        return Err(invalid("do-handler trigger out of range"));
                    }
                    if handler.do_fun.index() >= n_funs {
                        return Err(invalid("do-handler function out of range"));
                    }
                }
                for deferred in state.defers.iter() {
                    if deferred.index() >= n_events {
                        return Err(invalid("deferred event out of range"));
                    }
                }
                state.trans_set =
                    EventSet::from_events(state.transitions.iter().map(|t| t.trigger));
                state.do_set = EventSet::from_events(state.dos.iter().map(|d| d.trigger));
            }
        }

        self.initialized = true;
        Ok(self)
    }
}

fn invalid(reason: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidProgramTable {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use value_model::ValueType;

    use super::builder::{MachineBuilder, ProgramBuilder, StateBuilder};
    use super::{CaseDecl, EventId, FunDecl, StateId};
    use crate::dispatch::{FunOutcome, MachineContext};
    use crate::fault::{ErrorCode, RuntimeError};
    use value_model::Value;

    fn noop(_ctx: &mut MachineContext<'_>) -> Result<FunOutcome, RuntimeError> {
        Ok(FunOutcome::Return(Value::Null))
    }

    #[test]
    fn initialize_assigns_dense_indices() {
        let mut builder = ProgramBuilder::new();
        let ping = builder.event("PING", ValueType::Any, None);
        let pong = builder.event("PONG", ValueType::Any, None);

        let mut machine = MachineBuilder::new("Main");
        let entry = machine.function(FunDecl::new(noop));
        let exit = machine.function(FunDecl::new(noop));
        machine.state(StateBuilder::new("S0", entry, exit).build());
        builder.machine(machine.build());

        let program = builder.build().expect("valid program");
        assert_eq!(program.events()[ping.index()].decl_index(), 0);
        assert_eq!(program.events()[pong.index()].decl_index(), 1);
        assert_eq!(program.machines()[0].decl_index(), 0);
        assert!(program.is_initialized());
    }

    #[test]
    fn initialize_rejects_machine_without_states() {
        let mut builder = ProgramBuilder::new();
        builder.machine(MachineBuilder::new("Empty").build());
        let err = builder.build().expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::InvalidProgramTable);
    }

    #[test]
    fn initialize_rejects_out_of_range_transition() {
        let mut builder = ProgramBuilder::new();
        let ev = builder.event("E", ValueType::Any, None);

        let mut machine = MachineBuilder::new("Main");
        let entry = machine.function(FunDecl::new(noop));
        machine.state(
            StateBuilder::new("S0", entry, entry)
                .transition(ev, StateId::new(9), None)
                .build(),
        );
        builder.machine(machine.build());

        let err = builder.build().expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::InvalidProgramTable);
    }

    #[test]
    fn initialize_rejects_duplicate_receive_case_triggers() {
        let mut builder = ProgramBuilder::new();
        let ev = builder.event("E", ValueType::Any, None);

        let mut machine = MachineBuilder::new("Main");
        let handler = machine.function(FunDecl::new(noop));
        let entry = machine.function(FunDecl::new(noop).with_receive(
            0,
            vec![
                CaseDecl {
                    trigger: ev,
                    fun: handler,
                },
                CaseDecl {
                    trigger: ev,
                    fun: handler,
                },
            ],
        ));
        machine.state(StateBuilder::new("S0", entry, handler).build());
        builder.machine(machine.build());

        let err = builder.build().expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::InvalidProgramTable);
    }

    #[test]
    fn trigger_sets_are_derived_from_declarations() {
        let mut builder = ProgramBuilder::new();
        let go = builder.event("GO", ValueType::Any, None);
        let work = builder.event("WORK", ValueType::Any, None);
        let idle = builder.event("IDLE", ValueType::Any, None);

        let mut machine = MachineBuilder::new("Main");
        let entry = machine.function(FunDecl::new(noop));
        let s0 = StateBuilder::new("S0", entry, entry)
            .transition(go, StateId::new(0), None)
            .on(work, entry)
            .defer(idle)
            .build();
        machine.state(s0);
        builder.machine(machine.build());

        let program = builder.build().expect("valid program");
        let state = program.machines()[0].state(StateId::new(0));
        assert!(state.transition_triggers().contains(go));
        assert!(state.do_triggers().contains(work));
        assert!(state.defers.contains(idle));
        assert!(!state.transition_triggers().contains(EventId::new(9)));
    }

    #[test]
    fn link_resolution_follows_the_tables() {
        let mut builder = ProgramBuilder::new();
        let p = builder.symbol();
        let k = builder.symbol();
        let q = builder.symbol();

        let mut machine = MachineBuilder::new("Main");
        let entry = machine.function(FunDecl::new(noop));
        machine.state(StateBuilder::new("S0", entry, entry).build());
        let main = builder.machine(machine.build());

        builder.link(p, k, q);
        builder.define(p, main);
        builder.define(q, main);

        let program = builder.build().expect("valid program");
        assert_eq!(program.resolve_link(p, k), Some(q));
        assert_eq!(program.resolve_link(k, p), None);
        assert_eq!(program.resolve_definition(q), Some(main));
    }
}
