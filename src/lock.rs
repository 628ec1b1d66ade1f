//! Shared/exclusive per-file locks
//!
//! Each file carries a [`LockQueue`]: the current holders and a FIFO of
//! waiters. A shared request is granted at once unless an exclusive lock is
//! held or an exclusive request is already queued; an exclusive request is
//! granted only when nothing holds or waits. Releasing a lock grants the next
//! compatible run at the head of the queue: one exclusive waiter, or every
//! consecutive shared waiter.
//!
//! Two interfaces sit on the same queue. [`Isolate::acquire`] delivers the
//! grant to a callback, and a non-manual lock is released as soon as that
//! callback returns. [`Isolate::lock`] is the async form: it resolves to a
//! [`LockGuard`] that releases on drop.

use crate::error::{Result, VfsError};
use crate::file::FileId;
use crate::isolate::Isolate;
use futures::channel::oneshot;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, trace};

/// Lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Any number of shared holders may coexist
    Shared,
    /// A single holder, excluding everyone else
    Exclusive,
}

/// Identifies one lock request on one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockId {
    file: FileId,
    seq: u64,
}

impl LockId {
    /// File the lock belongs to
    #[must_use]
    pub const fn file(self) -> FileId {
        self.file
    }
}

/// Outcome passed to a lock callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lock {
    /// Request this outcome belongs to
    pub id: LockId,
    /// Requested mode
    pub mode: LockMode,
    /// Whether the holder must release explicitly
    pub manual: bool,
    /// `false` when the lock could not be granted, e.g. the file was destroyed
    pub ok: bool,
}

type LockCallback = Box<dyn FnOnce(&Isolate, &Lock)>;

pub(crate) struct Waiter {
    seq: u64,
    mode: LockMode,
    manual: bool,
    callback: LockCallback,
}

/// Holders and waiters of one file
#[derive(Default)]
pub(crate) struct LockQueue {
    holders: Vec<(u64, LockMode)>,
    pending: VecDeque<Waiter>,
}

impl LockQueue {
    pub(crate) fn is_held(&self) -> bool {
        !self.holders.is_empty()
    }

    pub(crate) fn take_pending(&mut self) -> VecDeque<Waiter> {
        std::mem::take(&mut self.pending)
    }

    fn exclusive_held(&self) -> bool {
        self.holders.iter().any(|(_, m)| *m == LockMode::Exclusive)
    }

    fn grantable(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                !self.exclusive_held() && !self.pending.iter().any(|w| w.mode == LockMode::Exclusive)
            }
            LockMode::Exclusive => self.holders.is_empty() && self.pending.is_empty(),
        }
    }

    /// Move the next compatible run from the head of the queue to the holders
    fn next_run(&mut self) -> Vec<Waiter> {
        let mut run = Vec::new();
        if self.exclusive_held() {
            return run;
        }
        match self.pending.front().map(|w| w.mode) {
            Some(LockMode::Exclusive) if self.holders.is_empty() => {
                if let Some(w) = self.pending.pop_front() {
                    self.holders.push((w.seq, w.mode));
                    run.push(w);
                }
            }
            Some(LockMode::Shared) => {
                while self
                    .pending
                    .front()
                    .is_some_and(|w| w.mode == LockMode::Shared)
                {
                    if let Some(w) = self.pending.pop_front() {
                        self.holders.push((w.seq, w.mode));
                        run.push(w);
                    }
                }
            }
            _ => {}
        }
        run
    }
}

impl Isolate {
    /// Request a lock, delivering the grant to `callback`
    ///
    /// The callback runs synchronously if the lock is available now,
    /// otherwise once it is granted, or with `ok == false` if the file is
    /// destroyed first. A non-manual lock is released when the callback
    /// returns; a manual one stays held until [`Isolate::release`].
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoSuchFile`] if the file does not exist or is
    /// being torn down; the callback is not called.
    pub fn acquire<F>(&self, file: FileId, mode: LockMode, manual: bool, callback: F) -> Result<LockId>
    where
        F: FnOnce(&Isolate, &Lock) + 'static,
    {
        let seq = self.next_seq();
        let id = LockId { file, seq };
        let waiter = Waiter {
            seq,
            mode,
            manual,
            callback: Box::new(callback),
        };

        let granted = {
            let mut files = self.arena().borrow_mut();
            let entry = files
                .get_mut(&file)
                .filter(|e| !e.dying)
                .ok_or(VfsError::NoSuchFile(file))?;
            if entry.locks.grantable(mode) {
                entry.locks.holders.push((seq, mode));
                Some(waiter)
            } else {
                entry.locks.pending.push_back(waiter);
                None
            }
        };

        match granted {
            Some(waiter) => self.deliver(file, vec![waiter]),
            None => trace!("lock {} on file {} queued ({:?})", seq, file, mode),
        }
        Ok(id)
    }

    /// Release a held lock or cancel a queued request
    ///
    /// Returns `false` if the id is neither held nor queued.
    pub fn release(&self, id: LockId) -> bool {
        let (cancelled, run) = {
            let mut files = self.arena().borrow_mut();
            let Some(entry) = files.get_mut(&id.file) else {
                return false;
            };
            let queue = &mut entry.locks;
            let cancelled = if let Some(pos) = queue.holders.iter().position(|(s, _)| *s == id.seq)
            {
                queue.holders.remove(pos);
                None
            } else if let Some(pos) = queue.pending.iter().position(|w| w.seq == id.seq) {
                queue.pending.remove(pos)
            } else {
                return false;
            };
            // A dying file grants nothing; its waiters fail at teardown
            let run = if entry.dying {
                Vec::new()
            } else {
                entry.locks.next_run()
            };
            (cancelled, run)
        };
        drop(cancelled);
        self.deliver(id.file, run);
        true
    }

    /// Request a manual lock and wait for it
    ///
    /// Resolves to `None` if the file is destroyed before the grant.
    /// Dropping the future before it resolves withdraws the request.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoSuchFile`] if the file does not exist.
    pub fn lock(&self, file: FileId, mode: LockMode) -> Result<LockFuture> {
        let (tx, rx) = oneshot::channel();
        let id = self.acquire(file, mode, true, move |_, lock| {
            let _ = tx.send(*lock);
        })?;
        Ok(LockFuture {
            iso: self.clone(),
            id,
            rx,
            done: false,
        })
    }

    /// Whether a file currently has any lock holder
    #[must_use]
    pub fn is_locked(&self, file: FileId) -> bool {
        self.arena()
            .borrow()
            .get(&file)
            .is_some_and(|e| e.locks.is_held())
    }

    fn deliver(&self, file: FileId, granted: Vec<Waiter>) {
        for waiter in granted {
            let lock = Lock {
                id: LockId {
                    file,
                    seq: waiter.seq,
                },
                mode: waiter.mode,
                manual: waiter.manual,
                ok: true,
            };
            trace!("lock {} on file {} granted ({:?})", waiter.seq, file, waiter.mode);
            (waiter.callback)(self, &lock);
            if !lock.manual {
                self.release(lock.id);
            }
        }
    }
}

/// Fail every waiter of a destroyed file
pub(crate) fn fail_waiters(iso: &Isolate, file: FileId, waiters: VecDeque<Waiter>) {
    if !waiters.is_empty() {
        debug!("failing {} lock waiter(s) of destroyed file {}", waiters.len(), file);
    }
    for waiter in waiters {
        let lock = Lock {
            id: LockId {
                file,
                seq: waiter.seq,
            },
            mode: waiter.mode,
            manual: waiter.manual,
            ok: false,
        };
        (waiter.callback)(iso, &lock);
    }
}

/// Future returned by [`Isolate::lock`]
pub struct LockFuture {
    iso: Isolate,
    id: LockId,
    rx: oneshot::Receiver<Lock>,
    done: bool,
}

impl LockFuture {
    /// Id of the pending request
    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }
}

impl Future for LockFuture {
    type Output = Option<LockGuard>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(outcome) => outcome,
        };
        self.done = true;
        Poll::Ready(match outcome {
            Ok(lock) if lock.ok => Some(LockGuard {
                iso: self.iso.clone(),
                id: lock.id,
                mode: lock.mode,
                released: false,
            }),
            _ => None,
        })
    }
}

impl Drop for LockFuture {
    fn drop(&mut self) {
        if !self.done {
            self.iso.release(self.id);
        }
    }
}

/// A held manual lock, released on drop
pub struct LockGuard {
    iso: Isolate,
    id: LockId,
    mode: LockMode,
    released: bool,
}

impl LockGuard {
    /// Id of the held lock
    #[must_use]
    pub const fn id(&self) -> LockId {
        self.id
    }

    /// Mode of the held lock
    #[must_use]
    pub const fn mode(&self) -> LockMode {
        self.mode
    }

    /// Release now instead of on drop
    pub fn release(mut self) {
        self.released = true;
        self.iso.release(self.id);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.iso.release(self.id);
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .finish()
    }
}
