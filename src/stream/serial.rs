//! Per-node callback trampoline
//!
//! The protocol allows `request` and `cancel` to be issued from inside
//! observer callbacks. Nodes with shared state linearize every callback
//! through one of these queues: a task arriving while another task runs
//! is deferred until the running one returns, so no task ever observes a
//! lock its own caller still holds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Task = Box<dyn FnOnce() + Send>;

pub(crate) struct Serial {
    running: AtomicBool,
    queue: Mutex<VecDeque<Task>>,
}

impl Serial {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Serial {
            running: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
        })
    }

    /// Run `task` now if this node is idle, otherwise queue it behind the
    /// active task. Queued tasks are drained in FIFO order on the thread
    /// that currently owns the node.
    pub(crate) fn exec<F: FnOnce() + Send + 'static>(&self, task: F) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(task));
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let next = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            match next {
                Some(task) => task(),
                None => {
                    self.running.store(false, Ordering::Release);
                    // a task may have been queued between the pop and the
                    // release; reclaim the node or leave it to the queuer
                    let nonempty = !self
                        .queue
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .is_empty();
                    if !nonempty || self.running.swap(true, Ordering::AcqRel) {
                        return;
                    }
                }
            }
        }
    }
}
