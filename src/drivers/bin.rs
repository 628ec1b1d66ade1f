//! Native binary file driver
//!
//! Serves `Bin` requests from a native file. Each file keeps a
//! [`TaskQueue`] so that stat, open, read, write and close run one at a time
//! in order. The native handle is opened lazily: a read or write arriving
//! while the file is closed queues an open ahead of itself, and an open that
//! finds the handle already present does nothing, so back-to-back requests
//! cause a single native open.
//!
//! Three variants differ only in access: `bin.r`, `bin.rw` and `bin.w`.

use crate::driver::Driver;
use crate::error::{Result, VfsError};
use crate::file::FileId;
use crate::isolate::Isolate;
use crate::req::{BinAccess, BinReply, BinRequest, Category, Replier, Reply, Request};
use crate::task_queue::TaskQueue;
use crate::watch::{EventMask, FileEvent, WatchId};
use compio::fs::{File, OpenOptions};
use compio::io::{AsyncReadAt, AsyncWriteAt};
use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use tracing::{debug, warn};

/// Read-only variant
pub const READ_ONLY: &str = "bin.r";
/// Read-write variant
pub const READ_WRITE: &str = "bin.rw";
/// Write-only variant
pub const WRITE_ONLY: &str = "bin.w";

/// Per-file state of a binary file
pub struct BinCtx {
    path: PathBuf,
    access: BinAccess,
    read_max: usize,
    handle: RefCell<Option<File>>,
    /// Native handle exists (it may be checked out by a running step)
    open: Cell<bool>,
    /// Last known native size
    size: Cell<u64>,
    watch: Cell<Option<WatchId>>,
}

impl BinCtx {
    /// Last known size of the native file
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size.get()
    }

    /// Whether the native file is currently open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.get()
    }
}

type BinQueue = TaskQueue<BinCtx>;

/// Binary file driver
pub struct BinDriver {
    name: &'static str,
    access: BinAccess,
}

impl BinDriver {
    /// `bin.r`
    #[must_use]
    pub const fn read_only() -> Self {
        Self {
            name: READ_ONLY,
            access: BinAccess {
                read: true,
                write: false,
            },
        }
    }

    /// `bin.rw`
    #[must_use]
    pub const fn read_write() -> Self {
        Self {
            name: READ_WRITE,
            access: BinAccess {
                read: true,
                write: true,
            },
        }
    }

    /// `bin.w`
    #[must_use]
    pub const fn write_only() -> Self {
        Self {
            name: WRITE_ONLY,
            access: BinAccess {
                read: false,
                write: true,
            },
        }
    }

    /// State of a file bound to a binary driver
    #[must_use]
    pub fn ctx(iso: &Isolate, file: FileId) -> Option<Rc<BinQueue>> {
        iso.state::<BinQueue>(file)
    }
}

impl Driver for BinDriver {
    fn name(&self) -> &str {
        self.name
    }

    fn categories(&self) -> &[Category] {
        &[Category::Bin]
    }

    fn init(&self, iso: &Isolate, file: FileId) -> Result<()> {
        let path = iso
            .npath(file)
            .ok_or_else(|| VfsError::MissingNativePath(self.name.to_string()))?;

        let queue = TaskQueue::new(
            file,
            BinCtx {
                path,
                access: self.access,
                read_max: iso.config().read_max,
                handle: RefCell::new(None),
                open: Cell::new(false),
                size: Cell::new(0),
                watch: Cell::new(None),
            },
        );
        let watch = iso.watch(file, EventMask::UPDATE_NATIVE, |iso, ev| {
            resync(iso, ev.file);
        })?;
        queue.watch.set(Some(watch));
        iso.set_state(file, Rc::clone(&queue) as Rc<dyn std::any::Any>);

        queue.enqueue(iso, stat);
        Ok(())
    }

    fn deinit(&self, iso: &Isolate, file: FileId) {
        let Some(queue) = iso.take_state::<BinQueue>(file) else {
            return;
        };
        if let Some(watch) = queue.watch.take() {
            iso.unwatch(watch);
        }
        // Every queued step holds a reference, so nothing is in flight here
        debug_assert!(queue.is_idle());
        if let Some(handle) = queue.handle.borrow_mut().take() {
            iso.stats().record_close();
            drop(handle);
        }
        queue.open.set(false);
        debug!("{} file {} released '{}'", self.name, file, queue.path.display());
    }

    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool {
        let Request::Bin(request) = request else {
            return false;
        };
        let Some(queue) = iso.state::<BinQueue>(file) else {
            return false;
        };

        match request {
            BinRequest::Access => {
                reply.send(Reply::Bin(BinReply::Access(self.access)));
                true
            }
            BinRequest::Read { offset, size } => {
                if !self.access.read {
                    return false;
                }
                ensure_open(iso, &queue);
                queue.enqueue(iso, move |iso, q| read(iso, q, offset, size, reply))
            }
            BinRequest::Write { offset, data } => {
                if !self.access.write {
                    return false;
                }
                ensure_open(iso, &queue);
                queue.enqueue(iso, move |iso, q| write(iso, q, offset, data, reply))
            }
        }
    }
}

fn ensure_open(iso: &Isolate, queue: &Rc<BinQueue>) {
    if !queue.open.get() {
        queue.enqueue(iso, open);
    }
}

/// Out-of-band change: refresh size, reopen, then tell watchers
fn resync(iso: &Isolate, file: FileId) {
    let Some(queue) = iso.state::<BinQueue>(file) else {
        return;
    };
    debug!("resyncing '{}'", queue.path.display());
    queue.enqueue(iso, stat);
    if queue.open.get() {
        queue.enqueue(iso, close);
        queue.enqueue(iso, open);
    }
    queue.enqueue(iso, |iso, q| async move {
        iso.trigger(q.file(), FileEvent::Update);
    });
}

async fn stat(iso: Isolate, q: Rc<BinQueue>) {
    iso.stats().record_stat();
    match compio::fs::metadata(&q.path).await {
        Ok(meta) => q.size.set(meta.len()),
        Err(e) => {
            iso.stats().record_error();
            warn!("stat '{}' failed: {}", q.path.display(), e);
        }
    }
}

async fn open(iso: Isolate, q: Rc<BinQueue>) {
    if q.handle.borrow().is_some() {
        return;
    }
    iso.stats().record_open();
    let result = OpenOptions::new()
        .read(q.access.read)
        .write(q.access.write)
        .open(&q.path)
        .await;
    match result {
        Ok(handle) => {
            *q.handle.borrow_mut() = Some(handle);
            q.open.set(true);
        }
        Err(e) => {
            iso.stats().record_error();
            warn!("open '{}' failed: {}", q.path.display(), e);
        }
    }
}

async fn close(iso: Isolate, q: Rc<BinQueue>) {
    let Some(handle) = q.handle.borrow_mut().take() else {
        return;
    };
    q.open.set(false);
    iso.stats().record_close();
    if let Err(e) = handle.close().await {
        iso.stats().record_error();
        warn!("close '{}' failed: {}", q.path.display(), e);
    }
}

async fn read(iso: Isolate, q: Rc<BinQueue>, offset: u64, size: usize, reply: Replier) {
    let available = q.size.get().saturating_sub(offset);
    let len = usize::try_from(available)
        .unwrap_or(usize::MAX)
        .min(size)
        .min(q.read_max);
    if len == 0 {
        reply.send(Reply::Bin(BinReply::Read {
            offset,
            data: Vec::new(),
        }));
        return;
    }

    // A failed open leaves no handle; the reply reports zero bytes
    let Some(handle) = q.handle.borrow_mut().take() else {
        reply.abort();
        return;
    };
    let buf_result = handle.read_at(vec![0u8; len], offset).await;
    *q.handle.borrow_mut() = Some(handle);

    match buf_result.0 {
        Ok(n) => {
            let mut data = buf_result.1;
            data.truncate(n);
            iso.stats().record_read(n as u64);
            reply.send(Reply::Bin(BinReply::Read { offset, data }));
        }
        Err(e) => {
            iso.stats().record_error();
            warn!("read '{}' at {} failed: {}", q.path.display(), offset, e);
            reply.abort();
        }
    }
}

async fn write(iso: Isolate, q: Rc<BinQueue>, offset: u64, data: Vec<u8>, reply: Replier) {
    if data.is_empty() {
        reply.abort();
        return;
    }
    let Some(mut handle) = q.handle.borrow_mut().take() else {
        reply.abort();
        return;
    };
    let buf_result = handle.write_at(data, offset).await;
    *q.handle.borrow_mut() = Some(handle);

    match buf_result.0 {
        Ok(n) => {
            iso.stats().record_write(n as u64);
            let end = offset + n as u64;
            if end > q.size.get() {
                q.size.set(end);
            }
            reply.send(Reply::Bin(BinReply::Write { offset, size: n }));
            if n > 0 {
                iso.trigger(q.file(), FileEvent::Update);
            }
        }
        Err(e) => {
            iso.stats().record_error();
            warn!("write '{}' at {} failed: {}", q.path.display(), offset, e);
            reply.abort();
        }
    }
}
