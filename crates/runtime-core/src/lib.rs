//! State-machine runtime core for Statecraft.
//!
//! Executes programs written in an actor-style state-machine language: a
//! static [`program::Program`] declares events, machines (states,
//! transitions, handlers, receive points), and a linking layer; at runtime a
//! [`process::Process`] instantiates machines, delivers events between them
//! through bounded queues, and drives each machine through its state graph.
//!
//! Scheduling is either task-neutral (the host calls [`Process::step`]) or
//! cooperative (host worker threads call [`Process::run`] and park on a
//! semaphore when idle).

/// Tagged argument intake for sends and machine creation.
pub mod args;
/// Event dispatch and state-transition stepping.
pub mod dispatch;
/// Fatal error taxonomy.
pub mod fault;
/// Machine instances and their queues.
pub mod machine;
/// Process lifecycle and the host surface.
pub mod process;
/// Static program tables.
pub mod program;
/// Scheduling policies and worker parking.
pub mod sched;
/// Machine-state snapshots and host callback sinks.
pub mod trace;

pub use args::Arg;
pub use dispatch::{FunOutcome, MachineContext, MachineFn};
pub use fault::{ErrorClass, ErrorCode, RuntimeError};
pub use machine::{MachineInstance, MachineStatus};
pub use process::{Process, ProcessConfig};
pub use program::builder::{MachineBuilder, ProgramBuilder, StateBuilder};
pub use program::{
    CaseDecl, DoDecl, EventDecl, EventId, EventSet, ForeignTypeDecl, FunDecl, FunId, MachineDecl,
    Program, ReceiveDecl, StateDecl, StateId, SymbolicName, TransitionDecl, TransitionKind,
    VarDecl,
};
pub use sched::{SchedulingPolicy, StepResult};
pub use trace::{DispatchEvent, ErrorSink, LogSink, MachineState, SilentSink};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
