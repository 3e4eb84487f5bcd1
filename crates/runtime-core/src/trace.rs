//! Host-facing observability: machine-state snapshots, dispatch events, and
//! the error/log sink traits.

use std::sync::Arc;

use crate::fault::RuntimeError;
use crate::program::EventId;

/// Snapshot of a machine's identity and position, passed to callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineState {
    /// 1-based machine id within the process; 0 for host-originated sends.
    pub machine_id: u32,
    /// Machine declaration name.
    pub machine_name: String,
    /// Current state index.
    pub state_id: u32,
    /// Current state name.
    pub state_name: String,
}

impl MachineState {
    /// Synthetic sender identity for host code sending from outside any
    /// machine.
    #[must_use]
    pub fn host() -> Self {
        Self {
            machine_id: 0,
            machine_name: "host".into(),
            state_id: 0,
            state_name: String::new(),
        }
    }
}

/// Observable dispatcher events, emitted in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// A state's entry function is about to run.
    Entry,
    /// A state's exit function is about to run.
    Exit,
    /// An event was removed from the queue for handling.
    Dequeue {
        /// Dequeued event id.
        event: EventId,
        /// Dequeued event name.
        event_name: String,
    },
    /// The machine executed halt.
    Halt,
    /// A push transition recorded the current state on the stack.
    Push,
    /// The state stack was popped.
    Pop,
}

/// Sink for observable dispatcher events.
///
/// Implementations must not call back into the process in a way that
/// re-enters the reporting machine's lock; record and return.
pub trait LogSink: Send + Sync {
    /// Observes one dispatcher event for one machine.
    fn on_event(&self, event: &DispatchEvent, machine: &MachineState);
}

/// Sink for fatal runtime errors.
///
/// After a report the process is terminating; the sink is the last observer
/// of the failure context. The reentrancy restriction of [`LogSink`] applies.
pub trait ErrorSink: Send + Sync {
    /// Observes one fatal error, with machine context when one was involved.
    fn on_error(&self, error: &RuntimeError, machine: Option<&MachineState>);
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentSink;

impl LogSink for SilentSink {
    fn on_event(&self, _event: &DispatchEvent, _machine: &MachineState) {}
}

impl ErrorSink for SilentSink {
    fn on_error(&self, _error: &RuntimeError, _machine: Option<&MachineState>) {}
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn on_event(&self, event: &DispatchEvent, machine: &MachineState) {
        (**self).on_event(event, machine);
    }
}

impl<T: ErrorSink + ?Sized> ErrorSink for Arc<T> {
    fn on_error(&self, error: &RuntimeError, machine: Option<&MachineState>) {
        (**self).on_error(error, machine);
    }
}
