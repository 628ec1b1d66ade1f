//! The isolate: file arena, driver registry, clock and lifecycle
//!
//! An isolate is the context every other component runs inside. It owns the
//! driver registry and the arena of files, and it is bound to the compio
//! runtime of the thread that created it. All state is single-threaded:
//! borrows of the arena are never held across a call into a driver or a
//! user callback, so drivers may re-enter the isolate freely.
//!
//! # Lifecycle
//!
//! A file starts with one reference owned by whoever created it. When the
//! count drops from one to zero the isolate, in order:
//!
//! 1. delivers the terminal [`FileEvent::Delete`] to remaining watchers,
//! 2. calls the driver's `deinit`,
//! 3. removes the file from the arena, checking that no lock is held and no
//!    watcher is left, and fails queued lock waiters.

use crate::driver::{select, Driver, DriverRegistry, DriverRule};
use crate::error::{Result, VfsError};
use crate::file::{FileEntry, FileHandle, FileId};
use crate::stats::IoStats;
use crate::watch::FileEvent;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default upper bound for a single binary read (8 MiB)
pub const DEFAULT_READ_MAX: usize = 8 * 1024 * 1024;

/// Default upper bound for buffered stream data (8 MiB)
pub const DEFAULT_STREAM_BUFFER_MAX: usize = 8 * 1024 * 1024;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// One `ext=driver` rule as written in configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    /// Extension without the leading dot
    pub ext: String,
    /// Name of the driver to bind
    pub driver: String,
}

impl FromStr for RuleSpec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (ext, driver) = s
            .split_once('=')
            .ok_or_else(|| format!("expected EXT=DRIVER, got '{s}'"))?;
        let ext = ext.trim_start_matches('.');
        if ext.is_empty() || driver.is_empty() {
            return Err(format!("expected EXT=DRIVER, got '{s}'"));
        }
        Ok(Self {
            ext: ext.to_string(),
            driver: driver.to_string(),
        })
    }
}

/// Isolate configuration
///
/// Used by: `Isolate::new()`, the binary driver (read clamp) and the echo
/// stream driver (buffer bound).
#[derive(clap::Args, Debug, Clone)]
#[command(next_help_heading = "Isolate Options")]
pub struct IsolateConfig {
    /// Extension rule mapping a native file extension to a driver (repeatable,
    /// first match wins). Defaults apply when none is given.
    #[arg(long = "rule", value_name = "EXT=DRIVER")]
    pub rules: Vec<RuleSpec>,

    /// Largest number of bytes a single binary read may return
    #[arg(long, default_value_t = DEFAULT_READ_MAX)]
    pub read_max: usize,

    /// Largest number of bytes a stream may buffer
    #[arg(long, default_value_t = DEFAULT_STREAM_BUFFER_MAX)]
    pub stream_buffer_max: usize,
}

impl Default for IsolateConfig {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            read_max: DEFAULT_READ_MAX,
            stream_buffer_max: DEFAULT_STREAM_BUFFER_MAX,
        }
    }
}

impl IsolateConfig {
    /// Rule specs in effect: the configured ones, or the defaults if empty
    #[must_use]
    pub fn effective_rules(&self) -> Vec<RuleSpec> {
        if !self.rules.is_empty() {
            return self.rules.clone();
        }
        ["txt", "md", "json", "csv", "bin", "dat"]
            .iter()
            .map(|ext| RuleSpec {
                ext: (*ext).to_string(),
                driver: crate::drivers::bin::READ_WRITE.to_string(),
            })
            .collect()
    }
}

// ============================================================================
// ISOLATE
// ============================================================================

pub(crate) struct IsolateInner {
    config: IsolateConfig,
    drivers: RefCell<DriverRegistry>,
    rules: RefCell<Option<Rc<[DriverRule]>>>,
    files: RefCell<HashMap<FileId, FileEntry>>,
    next_file: Cell<u64>,
    next_seq: Cell<u64>,
    root: RefCell<Option<FileHandle>>,
    stats: IoStats,
    started: Instant,
}

/// Handle to an isolate
///
/// Cloning is cheap and yields another handle to the same isolate.
///
/// # Runtime
///
/// Drivers that keep a [`TaskQueue`](crate::TaskQueue) (`bin.*`, `syncdir`)
/// spawn its first step on the current compio runtime, starting on the next
/// tick rather than inside the call that queued it. Creating or using such
/// files therefore needs a running runtime (`#[compio::main]`,
/// `#[compio::test]`); outside one, `compio::runtime::spawn` panics.
#[derive(Clone)]
pub struct Isolate {
    inner: Rc<IsolateInner>,
}

impl Isolate {
    /// Create an isolate with no drivers registered
    #[must_use]
    pub fn new(config: IsolateConfig) -> Self {
        Self {
            inner: Rc::new(IsolateInner {
                config,
                drivers: RefCell::new(DriverRegistry::new()),
                rules: RefCell::new(None),
                files: RefCell::new(HashMap::new()),
                next_file: Cell::new(1),
                next_seq: Cell::new(1),
                root: RefCell::new(None),
                stats: IoStats::new(),
                started: Instant::now(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<IsolateInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<IsolateInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn arena(&self) -> &RefCell<HashMap<FileId, FileEntry>> {
        &self.inner.files
    }

    pub(crate) fn next_seq(&self) -> u64 {
        let seq = self.inner.next_seq.get();
        self.inner.next_seq.set(seq + 1);
        seq
    }

    /// Configuration this isolate was built with
    #[must_use]
    pub fn config(&self) -> &IsolateConfig {
        &self.inner.config
    }

    /// Native I/O counters
    #[must_use]
    pub fn stats(&self) -> &IoStats {
        &self.inner.stats
    }

    /// Monotonic time elapsed since the isolate was created
    #[must_use]
    pub fn now(&self) -> Duration {
        self.inner.started.elapsed()
    }

    // ------------------------------------------------------------------------
    // Drivers
    // ------------------------------------------------------------------------

    /// Register a driver under its unique name
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::DuplicateDriver`] if the name is taken.
    pub fn register(&self, driver: Rc<dyn Driver>) -> Result<()> {
        self.inner.drivers.borrow_mut().register(driver)?;
        self.inner.rules.borrow_mut().take();
        Ok(())
    }

    /// Find a registered driver by name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Rc<dyn Driver>> {
        self.inner.drivers.borrow().lookup(name)
    }

    /// Find a registered driver by name, or fail
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::UnknownDriver`] if no driver has that name.
    pub fn driver(&self, name: &str) -> Result<Rc<dyn Driver>> {
        self.lookup(name)
            .ok_or_else(|| VfsError::UnknownDriver(name.to_string()))
    }

    /// Isolate-wide extension rules, resolved against the registry
    ///
    /// Rules naming an unregistered driver are skipped.
    #[must_use]
    pub fn rules(&self) -> Rc<[DriverRule]> {
        if let Some(rules) = self.inner.rules.borrow().as_ref() {
            return Rc::clone(rules);
        }
        let resolved: Rc<[DriverRule]> = self
            .inner
            .config
            .effective_rules()
            .into_iter()
            .filter_map(|spec| match self.lookup(&spec.driver) {
                Some(driver) => Some(DriverRule::new(spec.ext, driver)),
                None => {
                    warn!("rule '{}' names unknown driver '{}'", spec.ext, spec.driver);
                    None
                }
            })
            .collect();
        *self.inner.rules.borrow_mut() = Some(Rc::clone(&resolved));
        resolved
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    /// Create a file bound to `driver`
    ///
    /// The returned handle owns the file's initial reference.
    ///
    /// # Errors
    ///
    /// Returns the driver's init error; no partially constructed file is
    /// left behind.
    pub fn file_new(&self, driver: Rc<dyn Driver>, npath: Option<PathBuf>) -> Result<FileHandle> {
        let id = FileId(self.inner.next_file.get());
        self.inner.next_file.set(id.0 + 1);

        let entry = FileEntry::new(Rc::clone(&driver), npath);
        self.inner.files.borrow_mut().insert(id, entry);

        if let Err(e) = driver.init(self, id) {
            let entry = self.inner.files.borrow_mut().remove(&id);
            drop(entry);
            debug!("driver '{}' refused file {}: {}", driver.name(), id, e);
            return Err(e);
        }
        debug!("created file {} with driver '{}'", id, driver.name());
        Ok(FileHandle::adopt(self, id))
    }

    /// Create a file for a native path, choosing the driver by extension
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoDriverRule`] when no rule matches, or the
    /// driver's init error.
    pub fn file_new_from_npath(&self, rules: &[DriverRule], path: &Path) -> Result<FileHandle> {
        let driver = select(rules, path).ok_or_else(|| VfsError::NoDriverRule(path.into()))?;
        self.file_new(driver, Some(path.to_path_buf()))
    }

    /// Create a file for an existing native path
    ///
    /// A directory gets the synchronized directory driver; anything else is
    /// matched against the isolate rules.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::FileSystem`] if the path cannot be resolved,
    /// [`VfsError::UnknownDriver`] if the directory driver is not
    /// registered, or any error of [`Isolate::file_new_from_npath`].
    pub fn mount_native(&self, path: &Path) -> Result<FileHandle> {
        let path = path
            .canonicalize()
            .map_err(|e| VfsError::FileSystem(format!("'{}': {e}", path.display())))?;
        if path.is_dir() {
            let driver = self.driver(crate::drivers::syncdir::NAME)?;
            return self.file_new(driver, Some(path));
        }
        self.file_new_from_npath(&self.rules(), &path)
    }

    // ------------------------------------------------------------------------
    // Reference counting
    // ------------------------------------------------------------------------

    /// Take one more reference on a file
    ///
    /// Returns `false` if the file does not exist.
    pub fn file_ref(&self, file: FileId) -> bool {
        let mut files = self.inner.files.borrow_mut();
        let Some(entry) = files.get_mut(&file) else {
            return false;
        };
        if entry.dying {
            drop(files);
            fatal(&format!("file {file} referenced while being destroyed"));
        }
        entry.refcnt += 1;
        true
    }

    /// Release one reference; the last release destroys the file
    pub fn file_unref(&self, file: FileId) {
        let destroy = {
            let mut files = self.inner.files.borrow_mut();
            let Some(entry) = files.get_mut(&file) else {
                warn!("unref of unknown file {}", file);
                return;
            };
            if entry.refcnt == 0 {
                drop(files);
                fatal(&format!("file {file} released more often than referenced"));
            }
            entry.refcnt -= 1;
            if entry.refcnt == 0 {
                entry.dying = true;
            }
            entry.dying
        };
        if destroy {
            self.destroy(file);
        }
    }

    /// Take a reference wrapped in a handle
    ///
    /// Returns `None` if the file does not exist or is being torn down.
    #[must_use]
    pub fn hold(&self, file: FileId) -> Option<FileHandle> {
        if self.is_dying(file) {
            return None;
        }
        self.file_ref(file).then(|| FileHandle::adopt(self, file))
    }

    /// Whether the file's last reference is gone and teardown has begun
    #[must_use]
    pub fn is_dying(&self, file: FileId) -> bool {
        self.inner.files.borrow().get(&file).is_some_and(|e| e.dying)
    }

    /// Current reference count, if the file exists
    #[must_use]
    pub fn refcount(&self, file: FileId) -> Option<usize> {
        self.inner.files.borrow().get(&file).map(|e| e.refcnt)
    }

    /// Whether the file exists
    #[must_use]
    pub fn exists(&self, file: FileId) -> bool {
        self.inner.files.borrow().contains_key(&file)
    }

    /// Number of live files
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.inner.files.borrow().len()
    }

    fn destroy(&self, file: FileId) {
        self.deliver_event(file, FileEvent::Delete);

        if let Some(driver) = self.driver_of(file) {
            driver.deinit(self, file);
        }

        let Some(entry) = self.inner.files.borrow_mut().remove(&file) else {
            return;
        };
        if entry.refcnt != 0 {
            fatal(&format!("file {file} was referenced during teardown"));
        }
        if entry.locks.is_held() {
            fatal(&format!("file {file} destroyed while a lock is held"));
        }
        if !entry.watchers.is_empty() {
            fatal(&format!(
                "file {file} destroyed with {} watcher(s) still registered",
                entry.watchers.len()
            ));
        }
        debug!("destroyed file {} ('{}')", file, entry.driver.name());

        let FileEntry {
            mut locks, state, ..
        } = entry;
        drop(state);
        let waiters = locks.take_pending();
        crate::lock::fail_waiters(self, file, waiters);
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    /// Driver bound to a file
    #[must_use]
    pub fn driver_of(&self, file: FileId) -> Option<Rc<dyn Driver>> {
        self.inner
            .files
            .borrow()
            .get(&file)
            .map(|e| Rc::clone(&e.driver))
    }

    /// Native path of a file, if it has one
    #[must_use]
    pub fn npath(&self, file: FileId) -> Option<PathBuf> {
        self.inner
            .files
            .borrow()
            .get(&file)
            .and_then(|e| e.npath.clone())
    }

    /// Whether the file's driver answers a request category
    #[must_use]
    pub fn answers(&self, file: FileId, category: crate::req::Category) -> bool {
        self.driver_of(file).is_some_and(|d| d.answers(category))
    }

    /// Install the driver's opaque per-file state
    pub fn set_state(&self, file: FileId, state: Rc<dyn Any>) {
        let previous = self
            .inner
            .files
            .borrow_mut()
            .get_mut(&file)
            .and_then(|e| e.state.replace(state));
        drop(previous);
    }

    /// Driver state of a file, downcast to the driver's type
    #[must_use]
    pub fn state<T: Any>(&self, file: FileId) -> Option<Rc<T>> {
        let state = self.inner.files.borrow().get(&file)?.state.clone()?;
        state.downcast::<T>().ok()
    }

    /// Remove and return the driver state of a file
    #[must_use]
    pub fn take_state<T: Any>(&self, file: FileId) -> Option<Rc<T>> {
        let state = self.inner.files.borrow_mut().get_mut(&file)?.state.take()?;
        state.downcast::<T>().ok()
    }

    // ------------------------------------------------------------------------
    // Root
    // ------------------------------------------------------------------------

    /// Make a file the isolate root used by [`Isolate::pathfind_root`]
    pub fn set_root(&self, root: FileHandle) {
        let previous = self.inner.root.borrow_mut().replace(root);
        drop(previous);
    }

    /// Id of the isolate root, if set
    #[must_use]
    pub fn root(&self) -> Option<FileId> {
        self.inner.root.borrow().as_ref().map(FileHandle::id)
    }

    /// Drop the isolate root reference
    pub fn clear_root(&self) {
        let previous = self.inner.root.borrow_mut().take();
        drop(previous);
    }
}

/// Abort on a broken lifecycle invariant
#[allow(clippy::panic)] // Invariant violations are not recoverable
pub(crate) fn fatal(msg: &str) -> ! {
    error!("fatal: {msg}");
    panic!("{msg}");
}
