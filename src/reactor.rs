//! Single-threaded task and timer loop
//!
//! Sources that perform non-blocking work assume one external reactor:
//! `post` enqueues a task, `schedule` runs one after a delay, `run`
//! drives the loop until it is out of work (or stopped). The runtime
//! holds a [`WorkGuard`] while callbacks may still arrive from other
//! threads, so `run` does not return between bursts of work.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

struct Timer {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // reversed so the binary heap pops the earliest deadline first,
        // FIFO among equal deadlines
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ReactorState {
    ready: VecDeque<Task>,
    timers: BinaryHeap<Timer>,
    stopped: bool,
    guards: usize,
    seq: u64,
}

struct ReactorInner {
    state: Mutex<ReactorState>,
    cond: Condvar,
}

impl ReactorInner {
    fn lock(&self) -> MutexGuard<'_, ReactorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cloneable handle to a single-threaded event loop.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

impl Reactor {
    pub fn new() -> Self {
        Reactor {
            inner: Arc::new(ReactorInner {
                state: Mutex::new(ReactorState {
                    ready: VecDeque::new(),
                    timers: BinaryHeap::new(),
                    stopped: false,
                    guards: 0,
                    seq: 0,
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Enqueue a task on the reactor thread.
    pub fn post<F: FnOnce() + Send + 'static>(&self, task: F) {
        let mut state = self.inner.lock();
        if state.stopped {
            return;
        }
        state.ready.push_back(Box::new(task));
        self.inner.cond.notify_all();
    }

    /// Run a task after the given delay.
    pub fn schedule<F: FnOnce() + Send + 'static>(&self, delay: Duration, task: F) {
        let mut state = self.inner.lock();
        if state.stopped {
            return;
        }
        state.seq += 1;
        let seq = state.seq;
        state.timers.push(Timer {
            deadline: Instant::now() + delay,
            seq,
            task: Box::new(task),
        });
        self.inner.cond.notify_all();
    }

    /// Drive the loop until it runs out of work (and no work guard is
    /// alive) or `stop` is called. Returns the number of executed
    /// handlers.
    pub fn run(&self) -> usize {
        let mut executed = 0;
        while let Some(task) = self.next_task() {
            task();
            executed += 1;
        }
        executed
    }

    /// Make `run` return as soon as the current handler finishes.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.stopped = true;
        self.inner.cond.notify_all();
    }

    /// Keep `run` alive while work may still arrive from other threads.
    pub fn work(&self) -> WorkGuard {
        let mut state = self.inner.lock();
        state.guards += 1;
        WorkGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    fn next_task(&self) -> Option<Task> {
        let mut state = self.inner.lock();
        loop {
            if state.stopped {
                return None;
            }
            if let Some(task) = state.ready.pop_front() {
                return Some(task);
            }
            let now = Instant::now();
            let wait = match state.timers.peek() {
                Some(timer) if timer.deadline <= now => {
                    match state.timers.pop() {
                        Some(timer) => return Some(timer.task),
                        None => continue,
                    }
                }
                Some(timer) => Some(timer.deadline - now),
                None => None,
            };
            state = match wait {
                Some(duration) => {
                    self.inner
                        .cond
                        .wait_timeout(state, duration)
                        .unwrap_or_else(|e| e.into_inner())
                        .0
                }
                None => {
                    if state.guards == 0 {
                        return None;
                    }
                    self.inner
                        .cond
                        .wait(state)
                        .unwrap_or_else(|e| e.into_inner())
                }
            };
        }
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Reactor::new()
    }
}

/// RAII token that keeps the reactor loop alive.
pub struct WorkGuard {
    inner: Arc<ReactorInner>,
}

impl Drop for WorkGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.guards = state.guards.saturating_sub(1);
        self.inner.cond.notify_all();
    }
}
