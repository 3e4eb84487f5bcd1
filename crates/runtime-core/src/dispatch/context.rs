use value_model::{MachineRef, Value};

use crate::args::{collect_payload, Arg};
use crate::fault::RuntimeError;
use crate::machine::{MachineCore, MachineInstance};
use crate::process::ProcessInner;
use crate::program::{EventId, SymbolicName};

static NULL: Value = Value::Null;

/// Signature of a generated function body.
///
/// Bodies run inside the dispatcher with the owning machine's lock held. They
/// observe their arguments and locals through the context and finish by
/// returning a [`FunOutcome`]; a body that suspended at a receive point is
/// re-entered later with [`MachineContext::resume_point`] set.
pub type MachineFn = fn(&mut MachineContext<'_>) -> Result<FunOutcome, RuntimeError>;

/// How a function body finished.
#[derive(Debug)]
pub enum FunOutcome {
    /// Body completed; the value becomes the saved return.
    Return(Value),
    /// Body suspended at the receive point with this index.
    Receive(u16),
    /// Body executed a pop statement.
    Pop,
    /// Body executed a halt statement.
    Halt,
}

/// Execution context handed to function bodies.
///
/// Grants access to the running machine's payload, locals, and variables, and
/// to the process surfaces a body may call: sending events and creating
/// machines. The context never exposes another machine's state.
pub struct MachineContext<'a> {
    pub(crate) process: &'a ProcessInner,
    pub(crate) shell: &'a MachineInstance,
    pub(crate) core: &'a mut MachineCore,
}

impl MachineContext<'_> {
    /// Reference to the machine this body runs on.
    #[must_use]
    pub fn self_ref(&self) -> MachineRef {
        self.shell.machine_ref()
    }

    /// The machine reference as a sendable value.
    #[must_use]
    pub fn self_value(&self) -> Value {
        Value::Machine(self.shell.machine_ref())
    }

    /// Borrow of the payload this body was invoked with.
    #[must_use]
    pub fn payload(&self) -> &Value {
        self.core.frames.last().map_or(&NULL, |frame| &frame.payload)
    }

    /// Takes the payload, leaving null in its slot.
    #[must_use]
    pub fn take_payload(&mut self) -> Value {
        self.core
            .frames
            .last_mut()
            .map_or(Value::Null, |frame| frame.payload.take())
    }

    /// Borrow of a locals slot. The slot must be within the frame declared by
    /// the function.
    #[must_use]
    pub fn local(&self, slot: usize) -> &Value {
        self.core
            .frames
            .last()
            .map_or(&NULL, |frame| &frame.locals[slot])
    }

    /// Stores into a locals slot.
    pub fn set_local(&mut self, slot: usize, value: Value) {
        if let Some(frame) = self.core.frames.last_mut() {
            frame.locals[slot] = value;
        }
    }

    /// Takes a locals slot, leaving null behind.
    #[must_use]
    pub fn take_local(&mut self, slot: usize) -> Value {
        self.core
            .frames
            .last_mut()
            .map_or(Value::Null, |frame| frame.locals[slot].take())
    }

    /// Borrow of a machine-level variable slot.
    #[must_use]
    pub fn var(&self, slot: usize) -> &Value {
        &self.core.vars[slot]
    }

    /// Stores into a machine-level variable slot.
    pub fn set_var(&mut self, slot: usize, value: Value) {
        self.core.vars[slot] = value;
    }

    /// Takes a machine-level variable, leaving null behind.
    #[must_use]
    pub fn take_var(&mut self, slot: usize) -> Value {
        self.core.vars[slot].take()
    }

    /// The receive index this body is being resumed past, or `None` on fresh
    /// invocation.
    #[must_use]
    pub fn resume_point(&self) -> Option<u16> {
        self.core
            .frames
            .last()
            .and_then(|frame| frame.resume_point)
    }

    /// Takes the value returned by the most recently completed callee.
    #[must_use]
    pub fn take_returned(&mut self) -> Value {
        self.core.saved_return.take()
    }

    /// Sends an event to the machine named by `receiver`.
    ///
    /// A send to the running machine itself appends to its own queue; any
    /// other target is enqueued under that machine's lock and woken if it was
    /// blocked on the event.
    ///
    /// # Errors
    ///
    /// All failures are fatal and already reported through the process error
    /// sink when this returns: an unresolvable receiver, a halted receiver, a
    /// full queue, an exhausted event budget, or a rejected argument status.
    pub fn send(
        &mut self,
        receiver: &Value,
        event: EventId,
        args: Vec<Arg<'_>>,
    ) -> Result<(), RuntimeError> {
        let sender = self.process.snapshot(self.shell, self.core);
        let Some(target) = receiver.as_machine() else {
            let error = RuntimeError::InvalidMachineId { machine_id: 0 };
            self.process.report_fatal(&error, Some(&sender));
            return Err(error);
        };

        let payload_type = self.process.event_payload_type(event).map_err(|error| {
            self.process.report_fatal(&error, Some(&sender));
            error
        })?;
        let payload = collect_payload("send", payload_type, args).map_err(|error| {
            self.process.report_fatal(&error, Some(&sender));
            error
        })?;

        if target == self.shell.machine_ref() {
            let program = self.process.program();
            let decl = &program.machines()[self.shell.instance_of()];
            return self
                .core
                .enqueue(decl, program, event, payload)
                .map(|_| ())
                .map_err(|error| {
                    self.process.report_fatal(&error, Some(&sender));
                    error
                });
        }

        let machine = self.process.find_machine(target).map_err(|error| {
            self.process.report_fatal(&error, Some(&sender));
            error
        })?;
        self.process.enqueue_to(&sender, &machine, event, payload)
    }

    /// Creates a machine from a symbolic name, returning its reference value.
    ///
    /// # Errors
    ///
    /// Fatal and reported: the symbolic name has no machine definition, or an
    /// argument status was rejected.
    pub fn make_machine(
        &mut self,
        name: SymbolicName,
        args: Vec<Arg<'_>>,
    ) -> Result<Value, RuntimeError> {
        let sender = self.process.snapshot(self.shell, self.core);
        let machine = self.process.create_machine(name, args, Some(&sender))?;
        Ok(Value::Machine(machine.machine_ref()))
    }

    /// Creates a machine from a link-map slot of the running machine's
    /// symbolic name, returning its reference value.
    ///
    /// # Errors
    ///
    /// Fatal and reported: the link map has no entry for this machine and
    /// slot, the resolved name has no definition, or an argument status was
    /// rejected.
    pub fn make_symbolic_machine(
        &mut self,
        ior_m: SymbolicName,
        args: Vec<Arg<'_>>,
    ) -> Result<Value, RuntimeError> {
        let sender = self.process.snapshot(self.shell, self.core);
        let Some(resolved) = self
            .process
            .program()
            .resolve_link(self.shell.symbolic_name(), ior_m)
        else {
            let error = RuntimeError::InvalidProgramTable {
                reason: "link map has no entry for this creator and slot".into(),
            };
            self.process.report_fatal(&error, Some(&sender));
            return Err(error);
        };
        let machine = self.process.create_machine(resolved, args, Some(&sender))?;
        Ok(Value::Machine(machine.machine_ref()))
    }
}
