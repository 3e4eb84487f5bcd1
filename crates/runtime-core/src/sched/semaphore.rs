use parking_lot::{Condvar, Mutex};

/// Counting semaphore for cooperative worker parking.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<u32>,
    available: Condvar,
}

impl Semaphore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until a permit is available, then consumes it.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock();
        while *permits == 0 {
            self.available.wait(&mut permits);
        }
        *permits -= 1;
    }

    /// Adds one permit, waking one waiter.
    pub fn release(&self) {
        let mut permits = self.permits.lock();
        *permits += 1;
        drop(permits);
        self.available.notify_one();
    }
}
