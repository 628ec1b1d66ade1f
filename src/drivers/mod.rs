//! Drivers shipped with the crate
//!
//! - [`bin`]: native binary files (`bin.r`, `bin.rw`, `bin.w`)
//! - [`dir`]: in-memory directories
//! - [`syncdir`]: directories synchronized from native storage
//! - [`echo`]: a program whose sessions echo their input

pub mod bin;
pub mod dir;
pub mod echo;
pub mod syncdir;

use crate::error::Result;
use crate::file::FileHandle;
use crate::isolate::Isolate;
use crate::req::DirEntry;
use std::rc::Rc;

/// Register every builtin driver
///
/// # Errors
///
/// Returns [`crate::VfsError::DuplicateDriver`] if any of the names is
/// already taken.
pub fn register_builtin(iso: &Isolate) -> Result<()> {
    iso.register(Rc::new(bin::BinDriver::read_only()))?;
    iso.register(Rc::new(bin::BinDriver::read_write()))?;
    iso.register(Rc::new(bin::BinDriver::write_only()))?;
    iso.register(Rc::new(dir::DirDriver))?;
    iso.register(Rc::new(syncdir::SyncDirDriver))?;
    iso.register(Rc::new(echo::EchoDriver))?;
    iso.register(Rc::new(echo::EchoStreamDriver))?;
    Ok(())
}

/// Named owning edges of a directory, in insertion order
#[derive(Default)]
pub(crate) struct Children {
    entries: Vec<(String, FileHandle)>,
}

impl Children {
    pub(crate) fn find(&self, name: &str) -> Option<DirEntry> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, f)| DirEntry {
                name: n.clone(),
                file: f.id(),
            })
    }

    pub(crate) fn list(&self) -> Vec<DirEntry> {
        self.entries
            .iter()
            .map(|(n, f)| DirEntry {
                name: n.clone(),
                file: f.id(),
            })
            .collect()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Add an entry; fails if the name is taken
    pub(crate) fn insert(&mut self, name: String, file: FileHandle) -> std::result::Result<(), FileHandle> {
        if self.contains(&name) {
            return Err(file);
        }
        self.entries.push((name, file));
        Ok(())
    }

    /// Detach an entry, handing back its reference
    pub(crate) fn remove(&mut self, name: &str) -> Option<FileHandle> {
        let pos = self.entries.iter().position(|(n, _)| n == name)?;
        Some(self.entries.remove(pos).1)
    }

    /// Detach every entry whose name fails `keep`
    pub(crate) fn retain_names(&mut self, keep: impl Fn(&str) -> bool) -> Vec<FileHandle> {
        let (kept, dropped): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.entries).into_iter().partition(|(n, _)| keep(n));
        self.entries = kept;
        dropped.into_iter().map(|(_, f)| f).collect()
    }

    pub(crate) fn take_all(&mut self) -> Vec<FileHandle> {
        std::mem::take(&mut self.entries)
            .into_iter()
            .map(|(_, f)| f)
            .collect()
    }
}
