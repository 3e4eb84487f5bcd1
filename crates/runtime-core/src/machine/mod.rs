//! Machine instances: identity, queue, execution state, and the enqueue path.

pub(crate) mod queue;

use parking_lot::Mutex;
use value_model::{MachineRef, Value};

use crate::fault::RuntimeError;
use crate::program::{EventId, FunId, MachineDecl, Program, StateId, SymbolicName};

pub(crate) use queue::{Envelope, EventQueue};

/// Scheduling-visible status of a machine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachineStatus {
    /// Has work and waits for a scheduler slot.
    Runnable,
    /// Currently being advanced by the dispatcher.
    Running,
    /// Queue empty, or in receive with no matching queued event.
    Blocked,
    /// Executed halt; only teardown touches it from here.
    Halted,
}

/// A locals frame for one active or suspended function.
#[derive(Debug)]
pub(crate) struct Frame {
    pub fun: FunId,
    pub locals: Vec<Value>,
    pub payload: Value,
    pub resume_point: Option<u16>,
}

/// The receive point a suspended function is parked on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceivePoint {
    pub fun: FunId,
    pub receive_index: u16,
}

/// Where the dispatcher resumes this machine on its next advance.
#[derive(Debug)]
pub(crate) enum NextStep {
    /// Run the current state's entry function with this payload.
    Enter(Value),
    /// Examine the queue.
    Drain,
}

/// Whether an enqueue made the receiver newly runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnqueueOutcome {
    Delivered,
    Wakeup,
}

/// Mutable execution state of one machine, guarded by the instance lock.
#[derive(Debug)]
pub(crate) struct MachineCore {
    pub status: MachineStatus,
    pub current_state: StateId,
    pub state_stack: Vec<StateId>,
    pub vars: Vec<Value>,
    pub frames: Vec<Frame>,
    pub receive: Option<ReceivePoint>,
    pub saved_return: Value,
    pub queue: EventQueue,
    pub next_step: NextStep,
}

impl MachineCore {
    /// Appends an event, enforcing the queue bound and the event's
    /// per-queue instance budget, and decides whether the machine wakes.
    pub fn enqueue(
        &mut self,
        decl: &MachineDecl,
        program: &Program,
        event: EventId,
        payload: Value,
    ) -> Result<EnqueueOutcome, RuntimeError> {
        let event_decl = &program.events()[event.index()];

        if self.status == MachineStatus::Halted {
            return Err(RuntimeError::SendToHalted {
                machine: decl.name.clone(),
                event: event_decl.name.clone(),
            });
        }
        if let Some(limit) = event_decl.max_instances {
            if self.queue.count(event) >= limit {
                return Err(RuntimeError::EventMaxInstancesExceeded {
                    machine: decl.name.clone(),
                    event: event_decl.name.clone(),
                    limit,
                });
            }
        }
        if let Some(limit) = decl.max_queue_size {
            if self.queue.len() >= limit {
                return Err(RuntimeError::QueueOverflow {
                    machine: decl.name.clone(),
                    event: event_decl.name.clone(),
                    limit,
                });
            }
        }

        self.queue.push_back(event, payload);

        if self.status != MachineStatus::Blocked {
            return Ok(EnqueueOutcome::Delivered);
        }
        let wake = match self.receive {
            Some(point) => {
                let matches_case = decl
                    .fun(point.fun)
                    .receive(point.receive_index)
                    .is_some_and(|receive| receive.case_set().contains(event));
                matches_case && !decl.state(self.current_state).defers.contains(event)
            }
            None => true,
        };
        if wake {
            self.status = MachineStatus::Runnable;
            Ok(EnqueueOutcome::Wakeup)
        } else {
            Ok(EnqueueOutcome::Delivered)
        }
    }

    /// Halt semantics: release every queued payload and freeze the instance.
    pub fn halt(&mut self) {
        self.queue.drain();
        self.frames.clear();
        self.state_stack.clear();
        self.receive = None;
        self.status = MachineStatus::Halted;
    }
}

/// A machine instance owned by its process.
///
/// Identity fields are immutable for the life of the process; everything that
/// moves lives in the core behind the instance lock, which serializes enqueue
/// and dispatcher entry.
#[derive(Debug)]
pub struct MachineInstance {
    id: MachineRef,
    symbolic_name: SymbolicName,
    instance_of: usize,
    pub(crate) core: Mutex<MachineCore>,
}

impl MachineInstance {
    pub(crate) fn new(
        id: MachineRef,
        symbolic_name: SymbolicName,
        instance_of: usize,
        decl: &MachineDecl,
        event_kinds: usize,
        payload: Value,
    ) -> Self {
        Self {
            id,
            symbolic_name,
            instance_of,
            core: Mutex::new(MachineCore {
                status: MachineStatus::Runnable,
                current_state: decl.init_state,
                state_stack: Vec::new(),
                vars: vec![Value::Null; decl.vars.len()],
                frames: Vec::new(),
                receive: None,
                saved_return: Value::Null,
                queue: EventQueue::new(event_kinds),
                next_step: NextStep::Enter(payload),
            }),
        }
    }

    /// The 1-based machine id within the owning process.
    #[must_use]
    pub const fn machine_id(&self) -> u32 {
        self.id.machine_id()
    }

    /// Full machine reference, including the owning process guid.
    #[must_use]
    pub const fn machine_ref(&self) -> MachineRef {
        self.id
    }

    /// The machine reference as a sendable value.
    #[must_use]
    pub const fn id_value(&self) -> Value {
        Value::Machine(self.id)
    }

    /// The symbolic name this instance was created under.
    #[must_use]
    pub const fn symbolic_name(&self) -> SymbolicName {
        self.symbolic_name
    }

    /// Index of this instance's declaration in the program's machine table.
    #[must_use]
    pub const fn instance_of(&self) -> usize {
        self.instance_of
    }

    /// Current scheduling status.
    #[must_use]
    pub fn status(&self) -> MachineStatus {
        self.core.lock().status
    }

    /// Current queue length.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.core.lock().queue.len()
    }
}
