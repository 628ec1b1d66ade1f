//! File identity and owning references
//!
//! Files live in the isolate's arena and are addressed by [`FileId`]. An id is
//! never reused, so a stale id simply fails to resolve. Ownership is expressed
//! with [`FileHandle`], which holds exactly one reference and releases it on
//! drop; a bare `FileId` is a weak edge that must be looked up before use.

use crate::driver::Driver;
use crate::isolate::{Isolate, IsolateInner};
use crate::lock::LockQueue;
use crate::watch::Watcher;
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

/// Stable identifier of a file within one isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub(crate) u64);

impl FileId {
    /// Raw numeric value of the id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena slot for one file
pub(crate) struct FileEntry {
    pub(crate) driver: Rc<dyn Driver>,
    pub(crate) npath: Option<PathBuf>,
    pub(crate) state: Option<Rc<dyn Any>>,
    pub(crate) refcnt: usize,
    /// Set once the count reached zero; the file is being torn down
    pub(crate) dying: bool,
    pub(crate) watchers: Vec<Watcher>,
    pub(crate) locks: LockQueue,
}

impl FileEntry {
    pub(crate) fn new(driver: Rc<dyn Driver>, npath: Option<PathBuf>) -> Self {
        Self {
            driver,
            npath,
            state: None,
            refcnt: 1,
            dying: false,
            watchers: Vec::new(),
            locks: LockQueue::default(),
        }
    }
}

/// Owning reference to a file
///
/// Cloning takes another reference; dropping releases one. The handle only
/// keeps a weak pointer to its isolate, so files owning other files never
/// keep the isolate itself alive.
pub struct FileHandle {
    iso: Weak<IsolateInner>,
    id: FileId,
}

impl FileHandle {
    /// Wrap a reference the caller already owns
    ///
    /// The handle releases that reference when dropped.
    #[must_use]
    pub fn adopt(iso: &Isolate, id: FileId) -> Self {
        Self {
            iso: iso.downgrade(),
            id,
        }
    }

    /// Id of the referenced file
    #[must_use]
    pub const fn id(&self) -> FileId {
        self.id
    }

    /// Give up the handle without releasing its reference
    ///
    /// The caller becomes responsible for a matching [`Isolate::file_unref`].
    #[must_use]
    pub fn into_raw(self) -> FileId {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Clone for FileHandle {
    fn clone(&self) -> Self {
        if let Some(iso) = Isolate::upgrade(&self.iso) {
            iso.file_ref(self.id);
        }
        Self {
            iso: self.iso.clone(),
            id: self.id,
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(iso) = Isolate::upgrade(&self.iso) {
            iso.file_unref(self.id);
        }
    }
}

impl PartialEq for FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FileHandle {}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileHandle").field(&self.id).finish()
    }
}
