//! Scheduling: runnable-machine selection, the task-neutral stepping surface,
//! and cooperative worker parking.

pub(crate) mod semaphore;

use std::sync::Arc;

use crate::dispatch;
use crate::fault::RuntimeError;
use crate::machine::MachineStatus;
use crate::process::ProcessInner;
use semaphore::Semaphore;

/// How machines get scheduled onto threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SchedulingPolicy {
    /// No runtime-owned threads; the host drives [`crate::Process::step`].
    #[default]
    TaskNeutral,
    /// Host worker threads enter [`crate::Process::run`] and park on the
    /// work-available semaphore when idle.
    Cooperative,
}

/// Outcome of one task-neutral stepping call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepResult {
    /// A machine was advanced; more runnable work may exist.
    More,
    /// No machine is runnable.
    Idle,
    /// Stop was requested; no further work will be done.
    Terminating,
}

/// Cooperative scheduling record, guarded by the process lock.
///
/// The semaphores are shared out so parking and stopping never hold the
/// process lock while blocking.
#[derive(Debug)]
pub(crate) struct CooperativeScheduler {
    pub work_available: Arc<Semaphore>,
    pub all_stopped: Arc<Semaphore>,
    pub threads_waiting: u32,
}

impl CooperativeScheduler {
    pub fn new() -> Self {
        Self {
            work_available: Arc::new(Semaphore::new()),
            all_stopped: Arc::new(Semaphore::new()),
            threads_waiting: 0,
        }
    }
}

/// Picks the next runnable machine round-robin and advances it once under its
/// lock.
pub(crate) fn step_process(process: &ProcessInner) -> StepResult {
    let (machines, cursor) = {
        let core = process.core.lock();
        if core.terminating {
            return StepResult::Terminating;
        }
        (core.machines.clone(), core.rr_cursor)
    };
    if machines.is_empty() {
        return StepResult::Idle;
    }

    let count = machines.len();
    for offset in 0..count {
        let index = (cursor + offset) % count;
        let machine = &machines[index];

        let mut guard = machine.core.lock();
        if guard.status != MachineStatus::Runnable {
            continue;
        }
        guard.status = MachineStatus::Running;
        let outcome = dispatch::advance(process, machine, &mut guard);
        if guard.status == MachineStatus::Running {
            guard.status = MachineStatus::Runnable;
        }
        drop(guard);

        {
            let mut core = process.core.lock();
            core.rr_cursor = (index + 1) % count;
        }
        return match outcome {
            Ok(()) => StepResult::More,
            Err(_) => StepResult::Terminating,
        };
    }
    StepResult::Idle
}

/// Cooperative worker loop: step while there is work, park when idle, exit on
/// termination.
pub(crate) fn run_worker(process: &ProcessInner) {
    loop {
        match step_process(process) {
            StepResult::Terminating => return,
            StepResult::More => std::thread::yield_now(),
            StepResult::Idle => {
                if wait_for_work(process) {
                    return;
                }
            }
        }
    }
}

/// Parks the calling worker on the work-available semaphore.
///
/// Returns `true` when the process is terminating and the worker must exit.
/// The last waiter to leave during termination signals the all-stopped
/// semaphore.
pub(crate) fn wait_for_work(process: &ProcessInner) -> bool {
    let work_available = {
        let mut core = process.core.lock();
        let Some(coop) = core.coop.as_mut() else {
            drop(core);
            process.report_fatal(&RuntimeError::InvalidPolicy, None);
            return true;
        };
        coop.threads_waiting += 1;
        Arc::clone(&coop.work_available)
    };

    work_available.acquire();

    let (terminating, stopped_signal) = {
        let mut core = process.core.lock();
        let terminating = core.terminating;
        match core.coop.as_mut() {
            Some(coop) => {
                coop.threads_waiting -= 1;
                let signal = (terminating && coop.threads_waiting == 0)
                    .then(|| Arc::clone(&coop.all_stopped));
                (terminating, signal)
            }
            None => (terminating, None),
        }
    };
    if let Some(all_stopped) = stopped_signal {
        all_stopped.release();
    }
    terminating
}
