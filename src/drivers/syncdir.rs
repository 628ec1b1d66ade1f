//! Directory synchronized from native storage
//!
//! Entries mirror a native directory. A scan runs on the file's task queue:
//! it lists the native directory off the event loop, drops children whose
//! native entry vanished and creates children for new ones. Regular files
//! get a driver from the extension rules (or are skipped when none
//! matches); subdirectories always get this same driver. `List` and `Find`
//! are queued behind any pending scan, so answers reflect the synced state.
//!
//! The first directory request triggers the initial scan and every
//! [`FileEvent::UpdateNative`] queues a rescan.

use crate::driver::{select, Driver, DriverRule};
use crate::drivers::Children;
use crate::error::{Result, VfsError};
use crate::file::FileId;
use crate::isolate::Isolate;
use crate::req::{Category, DirAccess, DirReply, DirRequest, Replier, Reply, Request};
use crate::task_queue::TaskQueue;
use crate::watch::{EventMask, FileEvent, WatchId};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

/// Registered name
pub const NAME: &str = "syncdir";

/// Per-file state of a synchronized directory
pub struct SyncDirCtx {
    path: PathBuf,
    children: RefCell<Children>,
    /// Overrides the isolate rules for this directory and its subdirectories
    rules: RefCell<Option<Rc<[DriverRule]>>>,
    scan_queued: Cell<bool>,
    last_scan: Cell<Option<Duration>>,
    watch: Cell<Option<WatchId>>,
}

type SyncDirQueue = TaskQueue<SyncDirCtx>;

/// Synchronized directory driver
pub struct SyncDirDriver;

impl SyncDirDriver {
    /// Replace the extension rules used for new children of `file`
    ///
    /// Subdirectories created afterwards inherit the override. Returns
    /// `false` if `file` is not a synchronized directory.
    pub fn set_rules(iso: &Isolate, file: FileId, rules: Rc<[DriverRule]>) -> bool {
        let Some(queue) = iso.state::<SyncDirQueue>(file) else {
            return false;
        };
        *queue.rules.borrow_mut() = Some(rules);
        true
    }

    /// Isolate time of the last completed scan
    #[must_use]
    pub fn last_scan(iso: &Isolate, file: FileId) -> Option<Duration> {
        iso.state::<SyncDirQueue>(file)?.last_scan.get()
    }
}

impl Driver for SyncDirDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn categories(&self) -> &[Category] {
        &[Category::Dir]
    }

    fn init(&self, iso: &Isolate, file: FileId) -> Result<()> {
        let path = iso
            .npath(file)
            .ok_or_else(|| VfsError::MissingNativePath(NAME.to_string()))?;

        let queue = TaskQueue::new(
            file,
            SyncDirCtx {
                path,
                children: RefCell::new(Children::default()),
                rules: RefCell::new(None),
                scan_queued: Cell::new(false),
                last_scan: Cell::new(None),
                watch: Cell::new(None),
            },
        );
        let watch = iso.watch(file, EventMask::UPDATE_NATIVE, |iso, ev| {
            if let Some(queue) = iso.state::<SyncDirQueue>(ev.file) {
                queue.scan_queued.set(true);
                queue.enqueue(iso, scan);
            }
        })?;
        queue.watch.set(Some(watch));
        iso.set_state(file, queue);
        Ok(())
    }

    fn deinit(&self, iso: &Isolate, file: FileId) {
        let Some(queue) = iso.take_state::<SyncDirQueue>(file) else {
            return;
        };
        if let Some(watch) = queue.watch.take() {
            iso.unwatch(watch);
        }
        let children = queue.children.borrow_mut().take_all();
        debug!(
            "syncdir {} ('{}') releasing {} entries",
            file,
            queue.path.display(),
            children.len()
        );
        drop(children);
    }

    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool {
        let Request::Dir(request) = request else {
            return false;
        };
        let Some(queue) = iso.state::<SyncDirQueue>(file) else {
            return false;
        };

        match request {
            DirRequest::Access => {
                reply.send(Reply::Dir(DirReply::Access(DirAccess {
                    list: true,
                    find: true,
                    add: false,
                    remove: false,
                })));
                true
            }
            DirRequest::List => {
                ensure_scanned(iso, &queue);
                queue.enqueue(iso, move |_, q| async move {
                    let entries = q.children.borrow().list();
                    reply.send(Reply::Dir(DirReply::List(entries)));
                })
            }
            DirRequest::Find { name } => {
                ensure_scanned(iso, &queue);
                queue.enqueue(iso, move |_, q| async move {
                    let entry = q.children.borrow().find(&name);
                    reply.send(Reply::Dir(DirReply::Find(entry)));
                })
            }
            DirRequest::Add { .. } | DirRequest::Remove { .. } => false,
        }
    }
}

fn ensure_scanned(iso: &Isolate, queue: &Rc<SyncDirQueue>) {
    if !queue.scan_queued.replace(true) {
        queue.enqueue(iso, scan);
    }
}

/// Native entries worth mirroring: `(name, is_dir)`, sorted by name
fn read_native(path: &Path) -> std::io::Result<Vec<(String, bool)>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if !file_type.is_file() && !file_type.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => entries.push((name, file_type.is_dir())),
            Err(raw) => debug!("skipping non-UTF-8 entry {:?}", raw),
        }
    }
    entries.sort();
    Ok(entries)
}

async fn scan(iso: Isolate, q: Rc<SyncDirQueue>) {
    iso.stats().record_scan();
    let path = q.path.clone();
    let listing = compio::runtime::spawn_blocking(move || read_native(&path)).await;
    let entries = match listing {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) => {
            iso.stats().record_error();
            warn!("scan '{}' failed: {}", q.path.display(), e);
            return;
        }
        Err(e) => {
            iso.stats().record_error();
            warn!("scan '{}' failed: spawn_blocking failed: {e:?}", q.path.display());
            return;
        }
    };

    let vanished = q
        .children
        .borrow_mut()
        .retain_names(|name| entries.iter().any(|(n, _)| n == name));
    let mut modified = !vanished.is_empty();
    // Released outside the borrow: each may tear down a whole subtree
    drop(vanished);

    let Some(dir_driver) = iso.driver_of(q.file()) else {
        return;
    };
    let override_rules = q.rules.borrow().clone();
    let rules = override_rules.clone().unwrap_or_else(|| iso.rules());

    for (name, is_dir) in entries {
        if q.children.borrow().contains(&name) {
            continue;
        }
        let npath = q.path.join(&name);
        let created = if is_dir {
            iso.file_new(Rc::clone(&dir_driver), Some(npath))
        } else {
            let Some(driver) = select(&rules, &npath) else {
                warn!("no suitable driver found for '{}'", npath.display());
                continue;
            };
            iso.file_new(driver, Some(npath))
        };
        let child = match created {
            Ok(child) => child,
            Err(e) => {
                warn!("skipping '{}': {}", q.path.join(&name).display(), e);
                continue;
            }
        };
        if is_dir {
            if let Some(rules) = &override_rules {
                SyncDirDriver::set_rules(&iso, child.id(), Rc::clone(rules));
            }
        }
        let rejected = q.children.borrow_mut().insert(name, child).err();
        modified |= rejected.is_none();
        drop(rejected);
    }

    q.last_scan.set(Some(iso.now()));
    if modified {
        debug!("syncdir '{}' changed", q.path.display());
        iso.trigger(q.file(), FileEvent::Update);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use crate::isolate::IsolateConfig;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> Isolate {
        let iso = Isolate::new(IsolateConfig::default());
        crate::drivers::register_builtin(&iso).expect("register");
        iso
    }

    async fn names(iso: &Isolate, dir: FileId) -> Vec<String> {
        iso.submit(dir, Request::list())
            .expect("list accepted")
            .await
            .into_entries()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    #[compio::test]
    async fn test_scan_mirrors_files_with_rules_and_dirs() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("notes.txt"), b"hello")?;
        fs::write(temp_dir.path().join("archive.zip"), b"PK")?;
        fs::create_dir(temp_dir.path().join("sub"))?;
        let iso = setup();

        let root = iso.file_new(
            iso.lookup(NAME).expect("registered"),
            Some(temp_dir.path().to_path_buf()),
        )?;
        assert!(SyncDirDriver::last_scan(&iso, root.id()).is_none());

        assert_eq!(names(&iso, root.id()).await, vec!["notes.txt", "sub"]);
        assert!(SyncDirDriver::last_scan(&iso, root.id()).is_some());

        let sub = iso
            .submit(root.id(), Request::find("sub"))
            .expect("find accepted")
            .await
            .into_entry()
            .expect("sub exists");
        assert_eq!(
            iso.driver_of(sub.file).map(|d| d.name().to_string()),
            Some(NAME.to_string())
        );
        Ok(())
    }

    #[compio::test]
    async fn test_rescan_drops_vanished_entries() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a.txt"), b"a")?;
        fs::write(temp_dir.path().join("b.txt"), b"b")?;
        let iso = setup();
        let root = iso.file_new(
            iso.lookup(NAME).expect("registered"),
            Some(temp_dir.path().to_path_buf()),
        )?;

        assert_eq!(names(&iso, root.id()).await, vec!["a.txt", "b.txt"]);
        let b = iso
            .submit(root.id(), Request::find("b.txt"))
            .expect("find accepted")
            .await
            .into_entry()
            .expect("b exists");

        fs::remove_file(temp_dir.path().join("b.txt"))?;
        fs::write(temp_dir.path().join("c.txt"), b"c")?;
        iso.trigger(root.id(), FileEvent::UpdateNative);

        assert_eq!(names(&iso, root.id()).await, vec!["a.txt", "c.txt"]);
        assert!(!iso.exists(b.file));
        Ok(())
    }

    #[compio::test]
    async fn test_rule_override_is_inherited() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested").join("image.raw"), b"\0\0")?;
        let iso = setup();
        let root = iso.file_new(
            iso.lookup(NAME).expect("registered"),
            Some(temp_dir.path().to_path_buf()),
        )?;
        let rules: Rc<[DriverRule]> = Rc::from(vec![DriverRule::new(
            "raw",
            iso.lookup(crate::drivers::bin::READ_ONLY).expect("registered"),
        )]);
        assert!(SyncDirDriver::set_rules(&iso, root.id(), rules));

        let found = iso.pathfind(root.id(), "nested/image.raw").await?;
        let file = found.resolved().expect("resolved through override");
        assert_eq!(
            iso.driver_of(file.id()).map(|d| d.name().to_string()),
            Some(crate::drivers::bin::READ_ONLY.to_string())
        );
        Ok(())
    }

    #[compio::test]
    async fn test_add_and_remove_are_rejected() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let iso = setup();
        let root = iso.file_new(
            iso.lookup(NAME).expect("registered"),
            Some(temp_dir.path().to_path_buf()),
        )?;
        let remove = Request::Dir(DirRequest::Remove { name: "x".into() });
        assert!(iso.submit(root.id(), remove).is_none());
        Ok(())
    }
}
