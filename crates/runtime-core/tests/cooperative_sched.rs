//! Cooperative scheduling: worker parking, send-driven wakeup, and shutdown.

#![allow(clippy::pedantic, clippy::nursery)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use log as _;
use parking_lot::Mutex;
use proptest as _;
use rstest as _;
use thiserror as _;

use runtime_core::{
    DispatchEvent, ErrorCode, ErrorSink, EventId, LogSink, MachineState, Process, ProcessConfig,
    Program, ProgramBuilder, RuntimeError, SchedulingPolicy, StateBuilder, StepResult,
    SymbolicName,
};
use runtime_core::{MachineBuilder, MachineStatus};
use value_model::{ProcessGuid, ValueType};

const MAIN: SymbolicName = SymbolicName::new(0);
const TICK: EventId = EventId::new(0);

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(MachineState, DispatchEvent)>>,
    errors: Mutex<Vec<RuntimeError>>,
}

impl Recorder {
    fn tick_dequeues(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(_, event)| {
                matches!(event, DispatchEvent::Dequeue { event, .. } if *event == TICK)
            })
            .count()
    }
}

impl LogSink for Recorder {
    fn on_event(&self, event: &DispatchEvent, machine: &MachineState) {
        self.events.lock().push((machine.clone(), event.clone()));
    }
}

impl ErrorSink for Recorder {
    fn on_error(&self, error: &RuntimeError, _machine: Option<&MachineState>) {
        self.errors.lock().push(error.clone());
    }
}

fn sleeper_program() -> Program {
    let mut builder = ProgramBuilder::new();
    let main = builder.symbol();
    builder.event("TICK", ValueType::Any, None);

    let mut machine = MachineBuilder::new("Sleeper");
    let noop = machine.noop();
    machine.state(StateBuilder::new("S0", noop, noop).on(TICK, noop).build());
    let index = builder.machine(machine.build());
    builder.define(main, index);
    builder.build().expect("sleeper program builds")
}

fn cooperative_process(recorder: &Arc<Recorder>) -> Process {
    Process::start(
        ProcessGuid::from_parts(0, 0, 0, 3),
        sleeper_program(),
        ProcessConfig {
            tracing_enabled: true,
            initial_policy: SchedulingPolicy::Cooperative,
        },
        Arc::clone(recorder),
        Arc::clone(recorder),
    )
    .expect("process starts")
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    predicate()
}

#[test]
fn workers_park_when_idle_wake_on_send_and_exit_on_stop() {
    let recorder = Arc::new(Recorder::default());
    let process = cooperative_process(&recorder);
    let sleeper = process.make_machine(MAIN, Vec::new()).expect("sleeper");

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let process = process.clone();
            std::thread::spawn(move || process.run())
        })
        .collect();

    assert!(
        wait_until(Duration::from_secs(2), || process.parked_workers() == 2),
        "both workers must park once the entry function ran"
    );
    assert_eq!(sleeper.status(), MachineStatus::Blocked);

    process
        .send(&MachineState::host(), &sleeper, TICK, Vec::new())
        .expect("wakeup send");

    assert!(
        wait_until(Duration::from_secs(2), || recorder.tick_dequeues() == 1),
        "the wakeup send must be dispatched"
    );
    assert!(
        wait_until(Duration::from_secs(2), || process.parked_workers() == 2),
        "the woken worker must park again"
    );
    assert_eq!(recorder.tick_dequeues(), 1);

    process.stop();
    for worker in workers {
        worker.join().expect("worker exits after stop");
    }
    assert_eq!(process.parked_workers(), 0);
    assert!(recorder.errors.lock().is_empty());
}

#[test]
fn run_under_task_neutral_policy_reports_invalid_policy() {
    let recorder = Arc::new(Recorder::default());
    let process = Process::start(
        ProcessGuid::from_parts(0, 0, 0, 4),
        sleeper_program(),
        ProcessConfig::default(),
        Arc::clone(&recorder),
        Arc::clone(&recorder),
    )
    .expect("process starts");

    process.run();

    let errors = recorder.errors.lock();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::InvalidPolicy);
    drop(errors);
    assert!(process.is_terminating());
}

#[test]
fn switching_policy_discards_cooperative_bookkeeping() {
    let recorder = Arc::new(Recorder::default());
    let process = cooperative_process(&recorder);
    assert_eq!(process.parked_workers(), 0);

    process.set_scheduling_policy(SchedulingPolicy::TaskNeutral);
    assert_eq!(process.parked_workers(), 0);
    let machine = process.make_machine(MAIN, Vec::new()).expect("machine");
    assert_eq!(process.step(), StepResult::More);
    assert_eq!(machine.status(), MachineStatus::Blocked);
}
