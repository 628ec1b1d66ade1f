//! Asynchronous path resolution across directory files
//!
//! A path is walked one segment at a time. Each step is a directory `Find`
//! request against the current file, which may itself need native I/O (a
//! synchronized directory scans before answering). The walk holds a
//! reference on the file being asked and swaps it for the child once found,
//! so nothing along the path can be torn down mid-walk.

use crate::error::{Result, VfsError};
use crate::file::{FileHandle, FileId};
use crate::isolate::Isolate;
use crate::req::Request;
use tracing::debug;

/// Outcome of a path walk
///
/// `base` is the deepest file reached and `remaining` the number of path
/// bytes left unresolved: the untouched suffix of the input from just past
/// the last separator consumed, including any slashes before the segment that
/// failed. Zero means the whole path resolved to `base`.
#[derive(Debug)]
pub struct Pathfind {
    base: FileHandle,
    remaining: usize,
}

impl Pathfind {
    /// Deepest file reached
    #[must_use]
    pub const fn base(&self) -> FileId {
        self.base.id()
    }

    /// Unresolved byte length of the path
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Whether every segment resolved
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.remaining == 0
    }

    /// Take the reference on the deepest file reached
    #[must_use]
    pub fn into_base(self) -> FileHandle {
        self.base
    }

    /// The resolved file, only if every segment resolved
    #[must_use]
    pub fn resolved(self) -> Option<FileHandle> {
        self.is_resolved().then_some(self.base)
    }
}

impl Isolate {
    /// Resolve a slash-separated path starting at `root`
    ///
    /// Leading and repeated slashes are ignored. A segment fails when the
    /// current file does not answer directory requests, has no entry of that
    /// name, or the entry's file vanished before it could be held.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoSuchFile`] if `root` does not exist. Failing to
    /// resolve a segment is not an error; see [`Pathfind::remaining`].
    pub async fn pathfind(&self, root: FileId, path: &str) -> Result<Pathfind> {
        let mut current = self.hold(root).ok_or(VfsError::NoSuchFile(root))?;
        let mut rest = path;
        let mut remaining = 0;

        loop {
            let unresolved = rest;
            rest = rest.trim_start_matches('/');
            if rest.is_empty() {
                break;
            }
            remaining = unresolved.len();
            let (name, tail) = rest.split_once('/').unwrap_or((rest, ""));

            let Some(pending) = self.submit(current.id(), Request::find(name)) else {
                debug!("pathfind: file {} is not a directory", current.id());
                break;
            };
            let Some(entry) = pending.await.into_entry() else {
                debug!("pathfind: '{}' not found in file {}", name, current.id());
                break;
            };
            let Some(child) = self.hold(entry.file) else {
                debug!("pathfind: '{}' vanished during lookup", name);
                break;
            };
            current = child;
            rest = tail;
            remaining = 0;
        }

        Ok(Pathfind {
            base: current,
            remaining,
        })
    }

    /// Resolve a path starting at the isolate root
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoRoot`] if no root is set.
    pub async fn pathfind_root(&self, path: &str) -> Result<Pathfind> {
        let root = self.root().ok_or(VfsError::NoRoot)?;
        self.pathfind(root, path).await
    }
}
