//! Command Counter
//!
//! Run-scoped bookkeeping of how many region tasks are pending, executing,
//! complete, errored or skipped. Every task that enters `pending` leaves
//! through exactly one of `complete`, `error` or `skipped`.

use std::sync::{Arc, Mutex, MutexGuard};

/// Point-in-time copy of the counter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandCounts {
    pub pending: usize,
    pub executing: usize,
    pub complete: usize,
    pub error: usize,
    pub skipped: usize,
}

impl CommandCounts {
    /// Tasks that have been queued so far
    pub fn total(&self) -> usize {
        self.pending + self.executing + self.complete + self.error + self.skipped
    }

    /// Tasks that reached a terminal state
    pub fn finished(&self) -> usize {
        self.complete + self.error + self.skipped
    }

    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.executing == 0
    }
}

/// Shared, lock-guarded counter. Only the transition methods mutate it.
#[derive(Debug, Default)]
pub struct CommandCounter {
    counts: Mutex<CommandCounts>,
}

impl CommandCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CommandCounts> {
        // Counts stay valid even if a holder panicked mid-update.
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> CommandCounts {
        *self.lock()
    }

    /// A task was queued
    pub fn enqueue(&self) {
        self.lock().pending += 1;
    }

    /// Pending -> Executing
    pub fn start(&self) {
        let mut c = self.lock();
        c.pending = c.pending.saturating_sub(1);
        c.executing += 1;
    }

    /// Executing -> Complete
    pub fn complete(&self) {
        let mut c = self.lock();
        c.executing = c.executing.saturating_sub(1);
        c.complete += 1;
    }

    /// Executing -> Error
    pub fn fail(&self) {
        let mut c = self.lock();
        c.executing = c.executing.saturating_sub(1);
        c.error += 1;
    }

    /// Pending -> Error, for tasks that never reached the fetch phase
    pub fn fail_pending(&self) {
        let mut c = self.lock();
        c.pending = c.pending.saturating_sub(1);
        c.error += 1;
    }

    /// Pending -> Skipped (service not deployed in the region)
    pub fn skip(&self) {
        let mut c = self.lock();
        c.pending = c.pending.saturating_sub(1);
        c.skipped += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Pending,
    Executing,
    Done,
}

/// Moves one task through the counter. If dropped before reaching a
/// terminal state (panic, abort) the task is counted as an error.
#[derive(Debug)]
pub struct TaskGuard {
    counter: Arc<CommandCounter>,
    stage: Stage,
}

impl TaskGuard {
    /// Enqueue a task and track it
    pub fn enqueue(counter: Arc<CommandCounter>) -> Self {
        counter.enqueue();
        Self {
            counter,
            stage: Stage::Pending,
        }
    }

    pub fn start(&mut self) {
        if self.stage == Stage::Pending {
            self.counter.start();
            self.stage = Stage::Executing;
        }
    }

    pub fn skip(mut self) {
        if self.stage == Stage::Pending {
            self.counter.skip();
            self.stage = Stage::Done;
        }
    }

    pub fn complete(mut self) {
        if self.stage == Stage::Executing {
            self.counter.complete();
            self.stage = Stage::Done;
        }
    }

    pub fn fail(mut self) {
        self.finish_failed();
    }

    fn finish_failed(&mut self) {
        match self.stage {
            Stage::Pending => self.counter.fail_pending(),
            Stage::Executing => self.counter.fail(),
            Stage::Done => {}
        }
        self.stage = Stage::Done;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.finish_failed();
    }
}
