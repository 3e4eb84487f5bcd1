//! Fluent construction of program tables.
//!
//! A code generator would normally emit these calls; tests and embedders use
//! them directly. `ProgramBuilder::build` hands the assembled tables to
//! [`Program::initialize`], so a built program is always validated.

use value_model::{Value, ValueType};

use super::{
    DoDecl, EventDecl, EventId, EventSet, ForeignTypeDecl, FunDecl, FunId, MachineDecl, Program,
    StateDecl, StateId, SymbolicName, TransitionDecl, TransitionKind, VarDecl,
};
use crate::dispatch::{FunOutcome, MachineContext};
use crate::fault::RuntimeError;

fn noop_body(_ctx: &mut MachineContext<'_>) -> Result<FunOutcome, RuntimeError> {
    Ok(FunOutcome::Return(Value::Null))
}

/// Builds the program-level tables: events, machines, and the linking layer.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    events: Vec<EventDecl>,
    machines: Vec<MachineDecl>,
    foreign_types: Vec<ForeignTypeDecl>,
    symbol_count: u32,
    links: Vec<(SymbolicName, SymbolicName, SymbolicName)>,
    defs: Vec<(SymbolicName, usize)>,
}

impl ProgramBuilder {
    /// Empty program builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares an event and returns its dense id.
    #[allow(clippy::cast_possible_truncation)]
    pub fn event(
        &mut self,
        name: impl Into<String>,
        payload_type: ValueType,
        max_instances: Option<u32>,
    ) -> EventId {
        let id = EventId::new(self.events.len() as u32);
        self.events
            .push(EventDecl::new(name, payload_type, max_instances));
        id
    }

    /// Declares a foreign type and returns its dense index.
    pub fn foreign_type(&mut self, name: impl Into<String>) -> usize {
        self.foreign_types.push(ForeignTypeDecl::new(name));
        self.foreign_types.len() - 1
    }

    /// Adds a machine declaration and returns its dense index.
    pub fn machine(&mut self, decl: MachineDecl) -> usize {
        self.machines.push(decl);
        self.machines.len() - 1
    }

    /// Allocates a fresh symbolic name.
    pub fn symbol(&mut self) -> SymbolicName {
        let name = SymbolicName::new(self.symbol_count);
        self.symbol_count += 1;
        name
    }

    /// Records `link[parent][child] = resolved`.
    pub fn link(&mut self, parent: SymbolicName, child: SymbolicName, resolved: SymbolicName) {
        self.links.push((parent, child, resolved));
    }

    /// Records `definition[name] = machine`.
    pub fn define(&mut self, name: SymbolicName, machine: usize) {
        self.defs.push((name, machine));
    }

    /// Assembles the linking tables and initializes the program.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidProgramTable`] when a link or definition
    /// names a symbol that was never allocated, or when
    /// [`Program::initialize`] rejects the assembled tables.
    pub fn build(self) -> Result<Program, RuntimeError> {
        let n_symbols = self.symbol_count as usize;
        let mut link_map = vec![vec![None; n_symbols]; n_symbols];
        for (parent, child, resolved) in self.links {
            if parent.index() >= n_symbols
                || child.index() >= n_symbols
                || resolved.index() >= n_symbols
            {
                return Err(RuntimeError::InvalidProgramTable {
                    reason: "link names an unallocated symbol".into(),
                });
            }
            link_map[parent.index()][child.index()] = Some(resolved);
        }

        let mut machine_def_map = vec![None; n_symbols];
        for (name, machine) in self.defs {
            if name.index() >= n_symbols {
                return Err(RuntimeError::InvalidProgramTable {
                    reason: "definition names an unallocated symbol".into(),
                });
            }
            machine_def_map[name.index()] = Some(machine);
        }

        Program::new(
            self.events,
            self.machines,
            self.foreign_types,
            link_map,
            machine_def_map,
        )
        .initialize()
    }
}

/// Builds one machine declaration: its function table and state graph.
#[derive(Debug)]
pub struct MachineBuilder {
    name: String,
    states: Vec<StateDecl>,
    funs: Vec<FunDecl>,
    vars: Vec<VarDecl>,
    init_state: StateId,
    max_queue_size: Option<usize>,
    noop: Option<FunId>,
}

impl MachineBuilder {
    /// Starts a machine declaration. The first declared state is initial
    /// unless [`Self::with_initial`] overrides it.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            funs: Vec::new(),
            vars: Vec::new(),
            init_state: StateId::new(0),
            max_queue_size: None,
            noop: None,
        }
    }

    /// Bounds the instance queue length.
    #[must_use]
    pub const fn with_max_queue_size(mut self, limit: usize) -> Self {
        self.max_queue_size = Some(limit);
        self
    }

    /// Overrides the initial state.
    #[must_use]
    pub const fn with_initial(mut self, state: StateId) -> Self {
        self.init_state = state;
        self
    }

    /// Registers a function and returns its id.
    #[allow(clippy::cast_possible_truncation)]
    pub fn function(&mut self, decl: FunDecl) -> FunId {
        let id = FunId::new(self.funs.len() as u32);
        self.funs.push(decl);
        id
    }

    /// A shared do-nothing function, registered on first use.
    pub fn noop(&mut self) -> FunId {
        if let Some(id) = self.noop {
            return id;
        }
        let id = self.function(FunDecl::new(noop_body));
        self.noop = Some(id);
        id
    }

    /// Declares a machine-level variable and returns its slot index.
    pub fn var(&mut self, name: impl Into<String>, var_type: ValueType) -> usize {
        self.vars.push(VarDecl {
            name: name.into(),
            var_type,
        });
        self.vars.len() - 1
    }

    /// Adds a state and returns its id.
    #[allow(clippy::cast_possible_truncation)]
    pub fn state(&mut self, decl: StateDecl) -> StateId {
        let id = StateId::new(self.states.len() as u32);
        self.states.push(decl);
        id
    }

    /// Finishes the machine declaration.
    #[must_use]
    pub fn build(self) -> MachineDecl {
        MachineDecl {
            name: self.name,
            states: self.states,
            funs: self.funs,
            init_state: self.init_state,
            max_queue_size: self.max_queue_size,
            vars: self.vars,
            decl_index: 0,
        }
    }
}

/// Builds one state declaration.
#[derive(Debug)]
pub struct StateBuilder {
    name: String,
    entry_fun: FunId,
    exit_fun: FunId,
    transitions: Vec<TransitionDecl>,
    dos: Vec<DoDecl>,
    defers: EventSet,
}

impl StateBuilder {
    /// Starts a state declaration with its entry and exit functions.
    #[must_use]
    pub fn new(name: impl Into<String>, entry_fun: FunId, exit_fun: FunId) -> Self {
        Self {
            name: name.into(),
            entry_fun,
            exit_fun,
            transitions: Vec::new(),
            dos: Vec::new(),
            defers: EventSet::new(),
        }
    }

    /// Defers an event while this state is current.
    #[must_use]
    pub fn defer(mut self, event: EventId) -> Self {
        self.defers.insert(event);
        self
    }

    /// Installs a do-handler.
    #[must_use]
    pub fn on(mut self, event: EventId, do_fun: FunId) -> Self {
        self.dos.push(DoDecl {
            trigger: event,
            do_fun,
        });
        self
    }

    /// Installs a goto transition.
    #[must_use]
    pub fn transition(mut self, event: EventId, dest: StateId, trans_fun: Option<FunId>) -> Self {
        self.transitions.push(TransitionDecl {
            trigger: event,
            dest,
            kind: TransitionKind::Goto,
            trans_fun,
        });
        self
    }

    /// Installs a push transition.
    #[must_use]
    pub fn push_transition(
        mut self,
        event: EventId,
        dest: StateId,
        trans_fun: Option<FunId>,
    ) -> Self {
        self.transitions.push(TransitionDecl {
            trigger: event,
            dest,
            kind: TransitionKind::Push,
            trans_fun,
        });
        self
    }

    /// Finishes the state declaration.
    #[must_use]
    pub fn build(self) -> StateDecl {
        StateDecl {
            name: self.name,
            entry_fun: self.entry_fun,
            exit_fun: self.exit_fun,
            transitions: self.transitions,
            dos: self.dos,
            defers: self.defers,
            trans_set: EventSet::new(),
            do_set: EventSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use value_model::ValueType;

    use super::{MachineBuilder, ProgramBuilder, StateBuilder, SymbolicName};
    use crate::fault::ErrorCode;

    #[test]
    fn build_rejects_links_on_unallocated_symbols() {
        let mut builder = ProgramBuilder::new();
        let p = builder.symbol();
        builder.link(p, SymbolicName::new(5), p);

        let mut machine = MachineBuilder::new("Main");
        let noop = machine.noop();
        machine.state(StateBuilder::new("S0", noop, noop).build());
        builder.machine(machine.build());

        let err = builder.build().expect_err("must reject");
        assert_eq!(err.code(), ErrorCode::InvalidProgramTable);
    }

    #[test]
    fn noop_is_registered_once() {
        let mut machine = MachineBuilder::new("Main");
        let first = machine.noop();
        let second = machine.noop();
        assert_eq!(first, second);
    }

    #[test]
    fn first_declared_state_is_initial_by_default() {
        let mut builder = ProgramBuilder::new();
        let _unused = builder.event("E", ValueType::Any, None);

        let mut machine = MachineBuilder::new("Main");
        let noop = machine.noop();
        let s0 = machine.state(StateBuilder::new("S0", noop, noop).build());
        machine.state(StateBuilder::new("S1", noop, noop).build());
        builder.machine(machine.build());

        let program = builder.build().expect("valid program");
        assert_eq!(program.machines()[0].init_state, s0);
    }
}
