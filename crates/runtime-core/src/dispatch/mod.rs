//! The dispatcher: applies events and continuation steps to one machine.
//!
//! [`advance`] drives a machine from its resumption point until it becomes
//! non-runnable: queue empty while not in receive, in receive with no
//! matching queued event, or halted. The caller holds the instance lock for
//! the whole advance; sends from the running machine to itself go through the
//! execution context, never back through the lock.

mod context;

use value_model::Value;

use crate::fault::RuntimeError;
use crate::machine::{
    Envelope, Frame, MachineCore, MachineInstance, MachineStatus, NextStep, ReceivePoint,
};
use crate::process::ProcessInner;
use crate::program::{FunId, MachineDecl, TransitionDecl, TransitionKind};
use crate::trace::DispatchEvent;

pub use context::{FunOutcome, MachineContext, MachineFn};

/// How one drained or received event left the machine.
enum DrainFlow {
    /// The event was handled; keep advancing.
    Worked,
    /// Nothing deliverable; the machine parks.
    Blocked,
    /// The machine halted while handling the event.
    Halted,
}

/// How a frame stack finished running.
enum FrameFlow {
    /// Every frame returned.
    Completed,
    /// The top function suspended at a receive point.
    Suspended,
    /// A function executed a pop statement.
    Popped,
    /// A function executed a halt statement.
    Halted,
}

/// How a run-to-completion function (exit or transition) finished.
enum ExitFlow {
    Done,
    Halted,
}

fn machine_decl<'a>(process: &'a ProcessInner, shell: &MachineInstance) -> &'a MachineDecl {
    &process.program().machines()[shell.instance_of()]
}

/// Advances one machine until it is no longer runnable.
///
/// Returns `Err` only for fatal errors, which are already reported through
/// the process error sink; the process is terminating when that happens.
pub(crate) fn advance(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<(), RuntimeError> {
    loop {
        if process.is_terminating() {
            core.status = MachineStatus::Runnable;
            return Ok(());
        }

        match std::mem::replace(&mut core.next_step, NextStep::Drain) {
            NextStep::Enter(payload) => {
                if enter_current(process, shell, core, payload)? {
                    return Ok(());
                }
            }
            NextStep::Drain => {
                let flow = if core.receive.is_some() {
                    scan_receive(process, shell, core)?
                } else {
                    drain_one(process, shell, core)?
                };
                match flow {
                    DrainFlow::Worked => {}
                    DrainFlow::Blocked => {
                        core.status = MachineStatus::Blocked;
                        return Ok(());
                    }
                    DrainFlow::Halted => return Ok(()),
                }
            }
        }
    }
}

/// Runs the current state's entry function. Returns `true` when the machine
/// halted.
fn enter_current(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
    payload: Value,
) -> Result<bool, RuntimeError> {
    process.emit(&DispatchEvent::Entry, &process.snapshot(shell, core));
    let entry = machine_decl(process, shell).state(core.current_state).entry_fun;
    match run_fresh(process, shell, core, entry, payload)? {
        FrameFlow::Completed | FrameFlow::Suspended => Ok(false),
        FrameFlow::Popped => pop_current(process, shell, core),
        FrameFlow::Halted => {
            halt_machine(process, shell, core);
            Ok(true)
        }
    }
}

/// Examines the queue in ordinary (non-receive) mode.
fn drain_one(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<DrainFlow, RuntimeError> {
    let decl = machine_decl(process, shell);
    let defers = &decl.state(core.current_state).defers;
    let Some(envelope) = core.queue.dequeue_first(|event| !defers.contains(event)) else {
        return Ok(DrainFlow::Blocked);
    };
    handle_event(process, shell, core, envelope)
}

/// Dispatches one dequeued event against the current state, propagating down
/// the state stack when unhandled.
fn handle_event(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
    envelope: Envelope,
) -> Result<DrainFlow, RuntimeError> {
    let decl = machine_decl(process, shell);
    let program = process.program();
    process.emit(
        &DispatchEvent::Dequeue {
            event: envelope.event,
            event_name: program.event_name(envelope.event).to_string(),
        },
        &process.snapshot(shell, core),
    );

    let event = envelope.event;

    loop {
        let state = decl.state(core.current_state);

        if let Some(transition) = state.transition_on(event) {
            let TransitionDecl {
                dest,
                kind,
                trans_fun,
                ..
            } = *transition;

            match run_exit(process, shell, core)? {
                ExitFlow::Halted => {
                    halt_machine(process, shell, core);
                    return Ok(DrainFlow::Halted);
                }
                ExitFlow::Done => {}
            }
            if let Some(fun) = trans_fun {
                let trans_payload = envelope.payload.deep_clone();
                match run_to_completion(process, shell, core, fun, trans_payload, "transition")? {
                    ExitFlow::Halted => {
                        halt_machine(process, shell, core);
                        return Ok(DrainFlow::Halted);
                    }
                    ExitFlow::Done => {}
                }
            }
            if kind == TransitionKind::Push {
                core.state_stack.push(core.current_state);
                process.emit(&DispatchEvent::Push, &process.snapshot(shell, core));
            }
            core.current_state = dest;
            core.next_step = NextStep::Enter(envelope.payload);
            return Ok(DrainFlow::Worked);
        }

        if let Some(handler) = state.do_on(event) {
            let fun = handler.do_fun;
            return match run_fresh(process, shell, core, fun, envelope.payload)? {
                FrameFlow::Completed | FrameFlow::Suspended => Ok(DrainFlow::Worked),
                FrameFlow::Popped => {
                    if pop_current(process, shell, core)? {
                        Ok(DrainFlow::Halted)
                    } else {
                        Ok(DrainFlow::Worked)
                    }
                }
                FrameFlow::Halted => {
                    halt_machine(process, shell, core);
                    Ok(DrainFlow::Halted)
                }
            };
        }

        if core.state_stack.is_empty() {
            let error = RuntimeError::UnhandledEvent {
                machine: decl.name.clone(),
                state: state.name.clone(),
                event: program.event_name(event).to_string(),
            };
            process.report_fatal(&error, Some(&process.snapshot(shell, core)));
            return Err(error);
        }

        match run_exit(process, shell, core)? {
            ExitFlow::Halted => {
                halt_machine(process, shell, core);
                return Ok(DrainFlow::Halted);
            }
            ExitFlow::Done => {}
        }
        process.emit(&DispatchEvent::Pop, &process.snapshot(shell, core));
        if let Some(parent) = core.state_stack.pop() {
            core.current_state = parent;
        }

        if decl.state(core.current_state).defers.contains(event) {
            core.queue.reinsert(envelope);
            return Ok(DrainFlow::Worked);
        }
    }
}

/// Scans the queue for the first event the active receive accepts, respecting
/// the current state's defers.
fn scan_receive(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<DrainFlow, RuntimeError> {
    let decl = machine_decl(process, shell);
    let Some(point) = core.receive else {
        return Ok(DrainFlow::Blocked);
    };
    let Some(receive_decl) = decl.fun(point.fun).receive(point.receive_index) else {
        let error = RuntimeError::InvalidProgramTable {
            reason: "active receive point has no declaration".into(),
        };
        process.report_fatal(&error, Some(&process.snapshot(shell, core)));
        return Err(error);
    };

    let defers = &decl.state(core.current_state).defers;
    let Some(envelope) = core
        .queue
        .dequeue_first(|event| receive_decl.case_set().contains(event) && !defers.contains(event))
    else {
        return Ok(DrainFlow::Blocked);
    };

    process.emit(
        &DispatchEvent::Dequeue {
            event: envelope.event,
            event_name: process.program().event_name(envelope.event).to_string(),
        },
        &process.snapshot(shell, core),
    );
    core.receive = None;

    let Some(case) = receive_decl
        .cases
        .iter()
        .find(|case| case.trigger == envelope.event)
    else {
        let error = RuntimeError::InvalidProgramTable {
            reason: "receive case set names an event without a case".into(),
        };
        process.report_fatal(&error, Some(&process.snapshot(shell, core)));
        return Err(error);
    };
    let fun = case.fun;

    match run_fresh(process, shell, core, fun, envelope.payload)? {
        FrameFlow::Completed | FrameFlow::Suspended => Ok(DrainFlow::Worked),
        FrameFlow::Popped => {
            if pop_current(process, shell, core)? {
                Ok(DrainFlow::Halted)
            } else {
                Ok(DrainFlow::Worked)
            }
        }
        FrameFlow::Halted => {
            halt_machine(process, shell, core);
            Ok(DrainFlow::Halted)
        }
    }
}

/// Pushes a fresh frame for `fun` and runs the frame stack.
fn run_fresh(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
    fun: FunId,
    payload: Value,
) -> Result<FrameFlow, RuntimeError> {
    let max_locals = machine_decl(process, shell).fun(fun).max_locals;
    core.frames.push(Frame {
        fun,
        locals: vec![Value::Null; max_locals],
        payload,
        resume_point: None,
    });
    run_top(process, shell, core)
}

/// Runs the top frame to an outcome, unwinding returns through suspended
/// callers until the stack is empty or a frame suspends again.
fn run_top(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<FrameFlow, RuntimeError> {
    let decl = machine_decl(process, shell);
    loop {
        let Some(frame) = core.frames.last() else {
            return Ok(FrameFlow::Completed);
        };
        let fun = frame.fun;
        let implementation = decl.fun(fun).implementation;

        let outcome = {
            let mut ctx = MachineContext {
                process,
                shell,
                core,
            };
            implementation(&mut ctx)?
        };

        match outcome {
            FunOutcome::Return(value) => {
                core.frames.pop();
                core.saved_return = value;
                if core.frames.is_empty() {
                    return Ok(FrameFlow::Completed);
                }
            }
            FunOutcome::Receive(index) => {
                if decl.fun(fun).receive(index).is_none() {
                    let error = RuntimeError::InvalidProgramTable {
                        reason: format!("function suspended at unknown receive index {index}"),
                    };
                    process.report_fatal(&error, Some(&process.snapshot(shell, core)));
                    return Err(error);
                }
                if let Some(top) = core.frames.last_mut() {
                    top.resume_point = Some(index);
                }
                core.receive = Some(ReceivePoint {
                    fun,
                    receive_index: index,
                });
                return Ok(FrameFlow::Suspended);
            }
            FunOutcome::Pop => {
                core.frames.clear();
                return Ok(FrameFlow::Popped);
            }
            FunOutcome::Halt => {
                core.frames.clear();
                return Ok(FrameFlow::Halted);
            }
        }
    }
}

/// Runs the current state's exit function. Exit functions never see events
/// and must run to completion.
fn run_exit(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<ExitFlow, RuntimeError> {
    process.emit(&DispatchEvent::Exit, &process.snapshot(shell, core));
    let exit = machine_decl(process, shell).state(core.current_state).exit_fun;
    run_to_completion(process, shell, core, exit, Value::Null, "exit")
}

/// Runs a function that may not suspend or pop (exit and transition bodies).
fn run_to_completion(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
    fun: FunId,
    payload: Value,
    role: &str,
) -> Result<ExitFlow, RuntimeError> {
    match run_fresh(process, shell, core, fun, payload)? {
        FrameFlow::Completed => Ok(ExitFlow::Done),
        FrameFlow::Halted => Ok(ExitFlow::Halted),
        FrameFlow::Suspended | FrameFlow::Popped => {
            let error = RuntimeError::InvalidProgramTable {
                reason: format!("{role} function must run to completion"),
            };
            process.report_fatal(&error, Some(&process.snapshot(shell, core)));
            Err(error)
        }
    }
}

/// Pops the state stack after a pop statement: exit of the current state,
/// then resume draining in the parent.
///
/// Returns `true` when the exit function halted the machine.
fn pop_current(
    process: &ProcessInner,
    shell: &MachineInstance,
    core: &mut MachineCore,
) -> Result<bool, RuntimeError> {
    match run_exit(process, shell, core)? {
        ExitFlow::Halted => {
            halt_machine(process, shell, core);
            return Ok(true);
        }
        ExitFlow::Done => {}
    }
    process.emit(&DispatchEvent::Pop, &process.snapshot(shell, core));
    let Some(parent) = core.state_stack.pop() else {
        let error = RuntimeError::InvalidProgramTable {
            reason: "pop from an unstacked state".into(),
        };
        process.report_fatal(&error, Some(&process.snapshot(shell, core)));
        return Err(error);
    };
    core.current_state = parent;
    Ok(false)
}

fn halt_machine(process: &ProcessInner, shell: &MachineInstance, core: &mut MachineCore) {
    process.emit(&DispatchEvent::Halt, &process.snapshot(shell, core));
    core.halt();
}
