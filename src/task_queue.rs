//! Serial operation queue
//!
//! Drivers that run multi-step native I/O on one file (stat, open, read,
//! write, close, scan) keep a [`TaskQueue`] as that file's state. Tasks run
//! strictly one at a time in submission order, while requests keep being
//! accepted synchronously and simply append more work.
//!
//! Every queued task owns a reference on the file from enqueue until it
//! completes, so the file cannot be torn down while work is outstanding and
//! `deinit` always observes an idle queue.

use crate::file::{FileHandle, FileId};
use crate::isolate::Isolate;
use futures::future::{FutureExt, LocalBoxFuture};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::rc::Rc;
use tracing::trace;

struct QueuedTask {
    future: LocalBoxFuture<'static, ()>,
    hold: FileHandle,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedTask>,
    running: bool,
}

/// FIFO of asynchronous steps for one file, carrying the driver context `C`
///
/// Dereferences to the context, so a task receiving `Rc<TaskQueue<C>>` reads
/// its driver state directly.
pub struct TaskQueue<C> {
    file: FileId,
    ctx: C,
    state: RefCell<QueueState>,
}

impl<C: 'static> TaskQueue<C> {
    /// Create an empty queue for `file`
    #[must_use]
    pub fn new(file: FileId, ctx: C) -> Rc<Self> {
        Rc::new(Self {
            file,
            ctx,
            state: RefCell::new(QueueState::default()),
        })
    }

    /// File the queue serves
    #[must_use]
    pub const fn file(&self) -> FileId {
        self.file
    }

    /// Driver context
    #[must_use]
    pub const fn ctx(&self) -> &C {
        &self.ctx
    }

    /// Tasks waiting to run, not counting the running one
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Whether no task is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether no task is queued or running
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.borrow();
        !state.running && state.pending.is_empty()
    }

    /// Append a task
    ///
    /// `task` is called right away to build the step's future, which runs
    /// after every previously enqueued step has finished. Returns `false`
    /// (and does not call `task`) if the file no longer exists.
    pub fn enqueue<F, Fut>(self: &Rc<Self>, iso: &Isolate, task: F) -> bool
    where
        F: FnOnce(Isolate, Rc<Self>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let Some(hold) = iso.hold(self.file) else {
            return false;
        };
        let future = task(iso.clone(), Rc::clone(self)).boxed_local();

        let start = {
            let mut state = self.state.borrow_mut();
            state.pending.push_back(QueuedTask { future, hold });
            !std::mem::replace(&mut state.running, true)
        };
        if start {
            trace!("task queue of file {} started", self.file);
            compio::runtime::spawn(Rc::clone(self).drain()).detach();
        }
        true
    }

    async fn drain(self: Rc<Self>) {
        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                match state.pending.pop_front() {
                    Some(task) => task,
                    None => {
                        state.running = false;
                        break;
                    }
                }
            };
            let QueuedTask { future, hold } = next;
            future.await;

            let idle = {
                let mut state = self.state.borrow_mut();
                if state.pending.is_empty() {
                    state.running = false;
                }
                !state.running
            };
            // May be the last reference, in which case the file is torn down
            // here and its deinit already sees an idle queue
            drop(hold);
            if idle {
                break;
            }
        }
        trace!("task queue of file {} drained", self.file);
    }
}

impl<C> Deref for TaskQueue<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.ctx
    }
}
