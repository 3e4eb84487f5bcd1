//! The process: program ownership, the machine table, host callbacks, and
//! lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use value_model::{MachineRef, ProcessGuid, Value, ValueType};

use crate::args::{collect_payload, Arg};
use crate::fault::RuntimeError;
use crate::machine::{EnqueueOutcome, MachineCore, MachineInstance};
use crate::program::{EventId, Program, SymbolicName};
use crate::sched::{self, CooperativeScheduler, SchedulingPolicy, StepResult};
use crate::trace::{DispatchEvent, ErrorSink, LogSink, MachineState};

/// Host configuration for a process, fixed at start.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Gates dispatch of observable events to the log sink. The `log` facade
    /// is fed either way.
    pub tracing_enabled: bool,
    /// Scheduling policy installed at start.
    pub initial_policy: SchedulingPolicy,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            tracing_enabled: true,
            initial_policy: SchedulingPolicy::TaskNeutral,
        }
    }
}

pub(crate) struct ProcessCore {
    pub machines: Vec<Arc<MachineInstance>>,
    pub machine_count: u32,
    pub terminating: bool,
    pub stopping: bool,
    pub policy: SchedulingPolicy,
    pub coop: Option<CooperativeScheduler>,
    pub rr_cursor: usize,
}

pub(crate) struct ProcessInner {
    pub guid: ProcessGuid,
    pub program: Arc<Program>,
    pub config: ProcessConfig,
    pub error_sink: Box<dyn ErrorSink>,
    pub log_sink: Box<dyn LogSink>,
    pub core: Mutex<ProcessCore>,
}

impl ProcessInner {
    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn is_terminating(&self) -> bool {
        self.core.lock().terminating
    }

    /// Feeds one observable dispatcher event to the log facade and, when
    /// tracing is enabled, to the host log sink.
    pub fn emit(&self, event: &DispatchEvent, machine: &MachineState) {
        log::trace!(
            "machine {} `{}` in `{}`: {:?}",
            machine.machine_id,
            machine.machine_name,
            machine.state_name,
            event
        );
        if self.config.tracing_enabled {
            self.log_sink.on_event(event, machine);
        }
    }

    /// Reports a fatal error and moves the process to terminating.
    pub fn report_fatal(&self, error: &RuntimeError, machine: Option<&MachineState>) {
        log::error!("fatal runtime error: {error}");
        self.error_sink.on_error(error, machine);
        self.core.lock().terminating = true;
    }

    /// Builds the callback-facing snapshot of a machine's identity and state.
    pub fn snapshot(&self, shell: &MachineInstance, core: &MachineCore) -> MachineState {
        let decl = &self.program.machines()[shell.instance_of()];
        MachineState {
            machine_id: shell.machine_id(),
            machine_name: decl.name.clone(),
            state_id: core.current_state.as_u32(),
            state_name: decl.state(core.current_state).name.clone(),
        }
    }

    pub fn event_payload_type(&self, event: EventId) -> Result<&ValueType, RuntimeError> {
        self.program
            .events()
            .get(event.index())
            .map(|decl| &decl.payload_type)
            .ok_or_else(|| RuntimeError::InvalidProgramTable {
                reason: format!("event id {} out of range", event.as_u32()),
            })
    }

    /// Resolves a machine reference to the instance table, enforcing the
    /// process-guid and bounds checks.
    pub fn find_machine(&self, target: MachineRef) -> Result<Arc<MachineInstance>, RuntimeError> {
        let invalid = || RuntimeError::InvalidMachineId {
            machine_id: target.machine_id(),
        };
        if target.process_guid() != self.guid || target.machine_id() == 0 {
            return Err(invalid());
        }
        let core = self.core.lock();
        core.machines
            .get(target.machine_id() as usize - 1)
            .cloned()
            .ok_or_else(invalid)
    }

    /// Enqueues under the receiver's lock and wakes a worker when the
    /// receiver became newly runnable. Failures are fatal and reported with
    /// the sender's context.
    pub fn enqueue_to(
        &self,
        sender: &MachineState,
        receiver: &MachineInstance,
        event: EventId,
        payload: Value,
    ) -> Result<(), RuntimeError> {
        let decl = &self.program.machines()[receiver.instance_of()];
        let outcome = {
            let mut guard = receiver.core.lock();
            guard.enqueue(decl, &self.program, event, payload)
        };
        match outcome {
            Ok(EnqueueOutcome::Wakeup) => {
                self.signal_work();
                Ok(())
            }
            Ok(EnqueueOutcome::Delivered) => Ok(()),
            Err(error) => {
                self.report_fatal(&error, Some(sender));
                Err(error)
            }
        }
    }

    /// Releases one work-available permit under the cooperative policy.
    pub fn signal_work(&self) {
        let work_available = {
            let core = self.core.lock();
            core.coop
                .as_ref()
                .map(|coop| Arc::clone(&coop.work_available))
        };
        if let Some(semaphore) = work_available {
            semaphore.release();
        }
    }

    /// Creates a machine instance for an already resolved symbolic name.
    /// Failures are fatal and reported with the creator's context.
    pub fn create_machine(
        &self,
        name: SymbolicName,
        args: Vec<Arg<'_>>,
        creator: Option<&MachineState>,
    ) -> Result<Arc<MachineInstance>, RuntimeError> {
        self.create_machine_inner(name, args).map_err(|error| {
            self.report_fatal(&error, creator);
            error
        })
    }

    fn create_machine_inner(
        &self,
        name: SymbolicName,
        args: Vec<Arg<'_>>,
    ) -> Result<Arc<MachineInstance>, RuntimeError> {
        let Some(instance_of) = self.program.resolve_definition(name) else {
            return Err(RuntimeError::InvalidProgramTable {
                reason: "symbolic name has no machine definition".into(),
            });
        };
        let decl = &self.program.machines()[instance_of];
        let entry = decl.state(decl.init_state).entry_fun;
        let payload = match decl.fun(entry).payload_type.as_ref() {
            Some(payload_type) => collect_payload("make_machine", payload_type, args)?,
            None => collect_payload("make_machine", &ValueType::Any, args)?,
        };

        let machine = {
            let mut core = self.core.lock();
            let id = core.machine_count + 1;
            let machine = Arc::new(MachineInstance::new(
                MachineRef::new(self.guid, id),
                name,
                instance_of,
                decl,
                self.program.events().len(),
                payload,
            ));
            core.machine_count = id;
            core.machines.push(Arc::clone(&machine));
            machine
        };
        log::debug!(
            "created machine {} `{}` (symbolic name {})",
            machine.machine_id(),
            decl.name,
            name.index()
        );
        self.signal_work();
        Ok(machine)
    }
}

/// A running process: the host handle for machine creation, sends, stepping,
/// and shutdown. Clones share the same process.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("guid", &self.inner.guid)
            .finish_non_exhaustive()
    }
}

impl Process {
    /// Starts a process over an initialized program.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::InvalidProgramTable`] when the program was not
    /// passed through [`Program::initialize`].
    pub fn start(
        guid: ProcessGuid,
        program: Program,
        config: ProcessConfig,
        error_sink: impl ErrorSink + 'static,
        log_sink: impl LogSink + 'static,
    ) -> Result<Self, RuntimeError> {
        if !program.is_initialized() {
            return Err(RuntimeError::InvalidProgramTable {
                reason: "program was not initialized".into(),
            });
        }
        let policy = config.initial_policy;
        let coop = (policy == SchedulingPolicy::Cooperative).then(CooperativeScheduler::new);
        log::debug!("starting process {guid}");
        Ok(Self {
            inner: Arc::new(ProcessInner {
                guid,
                program: Arc::new(program),
                config,
                error_sink: Box::new(error_sink),
                log_sink: Box::new(log_sink),
                core: Mutex::new(ProcessCore {
                    machines: Vec::new(),
                    machine_count: 0,
                    terminating: false,
                    stopping: false,
                    policy,
                    coop,
                    rr_cursor: 0,
                }),
            }),
        })
    }

    /// This process's guid.
    #[must_use]
    pub fn guid(&self) -> ProcessGuid {
        self.inner.guid
    }

    /// The shared program tables.
    #[must_use]
    pub fn program(&self) -> &Program {
        self.inner.program()
    }

    /// True once stop was requested or a fatal error was reported.
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.inner.is_terminating()
    }

    /// Installs a scheduling policy. Switching away from cooperative discards
    /// the parked-worker bookkeeping, so only switch while no worker is
    /// inside [`Process::run`].
    pub fn set_scheduling_policy(&self, policy: SchedulingPolicy) {
        let mut core = self.inner.core.lock();
        if core.policy == policy {
            return;
        }
        core.policy = policy;
        core.coop = match policy {
            SchedulingPolicy::Cooperative => Some(CooperativeScheduler::new()),
            SchedulingPolicy::TaskNeutral => None,
        };
    }

    /// Creates a machine from a symbolic name. The payload is built from the
    /// tagged arguments against the initial state's entry-function payload
    /// type.
    ///
    /// # Errors
    ///
    /// Fatal and reported: the symbolic name has no machine definition, or an
    /// argument status was rejected.
    pub fn make_machine(
        &self,
        name: SymbolicName,
        args: Vec<Arg<'_>>,
    ) -> Result<Arc<MachineInstance>, RuntimeError> {
        self.inner.create_machine(name, args, None)
    }

    /// Creates a machine through the link map: the creator's symbolic name
    /// and `ior_m` resolve to the child's symbolic name.
    ///
    /// # Errors
    ///
    /// Fatal and reported: no link-map entry, no machine definition for the
    /// resolved name, or a rejected argument status.
    pub fn make_symbolic_machine(
        &self,
        creator: &MachineInstance,
        ior_m: SymbolicName,
        args: Vec<Arg<'_>>,
    ) -> Result<Arc<MachineInstance>, RuntimeError> {
        let Some(resolved) = self
            .inner
            .program
            .resolve_link(creator.symbolic_name(), ior_m)
        else {
            let error = RuntimeError::InvalidProgramTable {
                reason: "link map has no entry for this creator and slot".into(),
            };
            let state = self.machine_state(creator);
            self.inner.report_fatal(&error, Some(&state));
            return Err(error);
        };
        let state = self.machine_state(creator);
        self.inner.create_machine(resolved, args, Some(&state))
    }

    /// Resolves a machine-reference value to its instance.
    ///
    /// The value must be a machine reference carrying this process's guid and
    /// a machine id in `1..=machine_count`.
    ///
    /// # Errors
    ///
    /// Fatal and reported: [`RuntimeError::InvalidMachineId`] on any other
    /// value.
    pub fn get_machine(&self, id: &Value) -> Result<Arc<MachineInstance>, RuntimeError> {
        let Some(target) = id.as_machine() else {
            let error = RuntimeError::InvalidMachineId { machine_id: 0 };
            self.inner.report_fatal(&error, None);
            return Err(error);
        };
        self.inner.find_machine(target).map_err(|error| {
            self.inner.report_fatal(&error, None);
            error
        })
    }

    /// Snapshot of a machine's identity and current state.
    #[must_use]
    pub fn machine_state(&self, machine: &MachineInstance) -> MachineState {
        let core = machine.core.lock();
        self.inner.snapshot(machine, &core)
    }

    /// Number of machines ever created in this process.
    #[must_use]
    pub fn machine_count(&self) -> u32 {
        self.inner.core.lock().machine_count
    }

    /// Sends an event to a machine on behalf of `sender`. Use
    /// [`MachineState::host`] for sends originating outside any machine.
    ///
    /// # Errors
    ///
    /// Fatal and reported: halted receiver, queue overflow, exhausted event
    /// budget, or a rejected argument status.
    pub fn send(
        &self,
        sender: &MachineState,
        receiver: &MachineInstance,
        event: EventId,
        args: Vec<Arg<'_>>,
    ) -> Result<(), RuntimeError> {
        let payload_type = self.inner.event_payload_type(event).map_err(|error| {
            self.inner.report_fatal(&error, Some(sender));
            error
        })?;
        let payload = collect_payload("send", payload_type, args).map_err(|error| {
            self.inner.report_fatal(&error, Some(sender));
            error
        })?;
        self.inner.enqueue_to(sender, receiver, event, payload)
    }

    /// Sends an event from one machine to another, deriving the sender
    /// snapshot from the sending instance.
    ///
    /// # Errors
    ///
    /// As for [`Process::send`].
    pub fn send_from(
        &self,
        sender: &MachineInstance,
        receiver: &MachineInstance,
        event: EventId,
        args: Vec<Arg<'_>>,
    ) -> Result<(), RuntimeError> {
        let state = self.machine_state(sender);
        self.send(&state, receiver, event, args)
    }

    /// Task-neutral stepping: advances at most one runnable machine.
    #[must_use]
    pub fn step(&self) -> StepResult {
        sched::step_process(&self.inner)
    }

    /// Cooperative worker entry: steps while work exists, parks when idle,
    /// returns when the process terminates.
    pub fn run(&self) {
        sched::run_worker(&self.inner);
    }

    /// Number of cooperative workers currently parked in
    /// [`Process::run`].
    #[must_use]
    pub fn parked_workers(&self) -> u32 {
        self.inner
            .core
            .lock()
            .coop
            .as_ref()
            .map_or(0, |coop| coop.threads_waiting)
    }

    /// Stops the process: marks it terminating, unparks every cooperative
    /// worker, waits for them to report stopped, then tears down all
    /// instances. Calling stop again after it completed is a no-op.
    pub fn stop(&self) {
        let wait_handle = {
            let mut core = self.inner.core.lock();
            if core.stopping {
                return;
            }
            core.stopping = true;
            core.terminating = true;
            let mut wait = None;
            if let Some(coop) = core.coop.as_ref() {
                let waiting = coop.threads_waiting;
                if waiting > 0 {
                    for _ in 0..waiting {
                        coop.work_available.release();
                    }
                    wait = Some(Arc::clone(&coop.all_stopped));
                }
            }
            wait
        };
        if let Some(all_stopped) = wait_handle {
            all_stopped.acquire();
        }

        let machines = {
            let mut core = self.inner.core.lock();
            std::mem::take(&mut core.machines)
        };
        for machine in machines {
            machine.core.lock().halt();
        }
        log::debug!("process {} stopped", self.inner.guid);
    }
}
