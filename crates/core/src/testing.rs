//! Deterministic [`DelayScheduler`] doubles
//!
//! - [`InlineScheduler`] runs every retry immediately on the scheduling thread
//! - [`ManualScheduler`] queues retries until the test releases them
//!
//! Both record the delays they were asked to wait, so backoff sequences can
//! be asserted without sleeping.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use crate::retry::{DelayScheduler, ScheduleError, ScheduledAttempt};

/// Runs each attempt synchronously, ignoring the delay.
#[derive(Debug, Default)]
pub struct InlineScheduler {
    delays: Mutex<Vec<Duration>>,
}

impl InlineScheduler {
    /// New scheduler with an empty delay log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

impl DelayScheduler for InlineScheduler {
    fn schedule(&self, delay: Duration, attempt: ScheduledAttempt) -> Result<(), ScheduleError> {
        self.delays.lock().push(delay);
        attempt.run();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ManualState {
    pending: VecDeque<ScheduledAttempt>,
    delays: Vec<Duration>,
    capacity: Option<usize>,
    shut_down: bool,
}

/// Queues attempts until [`run_next`](Self::run_next) releases them.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    /// Unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue that rejects attempts once `capacity` are pending.
    pub fn with_capacity(capacity: usize) -> Self {
        let state = ManualState { capacity: Some(capacity), ..ManualState::default() };
        Self { state: Mutex::new(state) }
    }

    /// Attempts waiting to run.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Delays requested so far, in order, rejected requests excluded.
    pub fn delays(&self) -> Vec<Duration> {
        self.state.lock().delays.clone()
    }

    /// Run the oldest pending attempt; false if none is queued.
    pub fn run_next(&self) -> bool {
        let next = self.state.lock().pending.pop_front();
        match next {
            Some(attempt) => {
                attempt.run();
                true
            }
            None => false,
        }
    }

    /// Run attempts until the queue stays empty; returns how many ran.
    pub fn run_all(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Reject future attempts and drop every pending one unrun.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.state.lock();
            state.shut_down = true;
            std::mem::take(&mut state.pending)
        };
        drop(dropped);
    }
}

impl DelayScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, attempt: ScheduledAttempt) -> Result<(), ScheduleError> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(ScheduleError::ShutDown);
        }
        if let Some(capacity) = state.capacity {
            if state.pending.len() >= capacity {
                return Err(ScheduleError::Saturated { capacity });
            }
        }
        state.delays.push(delay);
        state.pending.push_back(attempt);
        Ok(())
    }
}
