//! Driver contract, registry and extension-based selection
//!
//! A driver is an immutable descriptor: a unique name, the request categories
//! it answers, and the `init`/`deinit`/`handle` entry points. All per-file
//! state lives in the file itself (see [`Isolate::set_state`]).

use crate::error::{Result, VfsError};
use crate::file::FileId;
use crate::isolate::Isolate;
use crate::req::{Category, Replier, Request};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, warn};

/// Behavior template shared by every file bound to it
pub trait Driver {
    /// Unique name within an isolate
    fn name(&self) -> &str;

    /// Request categories this driver answers
    fn categories(&self) -> &[Category];

    /// Prepare per-file state
    ///
    /// May submit requests or queue native work for the new file. A driver
    /// that fails must undo everything it registered before returning.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be served by this driver, e.g.
    /// a native path is required but missing.
    fn init(&self, iso: &Isolate, file: FileId) -> Result<()>;

    /// Release per-file state
    ///
    /// Called exactly once, when the last reference is dropped. Nothing may
    /// reference the file after this returns.
    fn deinit(&self, iso: &Isolate, file: FileId);

    /// Accept or reject a request
    ///
    /// Returning `false` means the request cannot be attempted and `reply` is
    /// discarded. Returning `true` means `reply` is answered exactly once,
    /// now or later.
    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool;

    /// Whether this driver answers the given category
    fn answers(&self, category: Category) -> bool {
        self.categories().contains(&category)
    }
}

/// Named driver catalog owned by an isolate
#[derive(Default)]
pub struct DriverRegistry {
    drivers: Vec<Rc<dyn Driver>>,
}

impl DriverRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a driver
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::DuplicateDriver`] if the name is already taken.
    pub fn register(&mut self, driver: Rc<dyn Driver>) -> Result<()> {
        if self.lookup(driver.name()).is_some() {
            warn!("driver '{}' is already registered", driver.name());
            return Err(VfsError::DuplicateDriver(driver.name().to_string()));
        }
        debug!("registered driver '{}'", driver.name());
        self.drivers.push(driver);
        Ok(())
    }

    /// Find a driver by exact name
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Rc<dyn Driver>> {
        self.drivers.iter().find(|d| d.name() == name).cloned()
    }

    /// Number of registered drivers
    #[must_use]
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Names of all drivers in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.iter().map(|d| d.name())
    }
}

/// Maps a file extension (without the dot) to a driver
#[derive(Clone)]
pub struct DriverRule {
    /// Extension to match exactly, e.g. `"txt"`
    pub ext: String,
    /// Driver chosen when the extension matches
    pub driver: Rc<dyn Driver>,
}

impl DriverRule {
    /// Create a rule
    #[must_use]
    pub fn new(ext: impl Into<String>, driver: Rc<dyn Driver>) -> Self {
        Self {
            ext: ext.into(),
            driver,
        }
    }
}

impl fmt::Debug for DriverRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRule")
            .field("ext", &self.ext)
            .field("driver", &self.driver.name())
            .finish()
    }
}

/// Pick a driver for a native path by its final extension
///
/// Rules are scanned in order and the first match wins. A path without an
/// extension never matches.
#[must_use]
pub fn select(rules: &[DriverRule], path: &Path) -> Option<Rc<dyn Driver>> {
    let ext = path.extension()?.to_str()?;
    if ext.is_empty() {
        return None;
    }
    rules
        .iter()
        .find(|rule| rule.ext == ext)
        .map(|rule| Rc::clone(&rule.driver))
}
