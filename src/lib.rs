//! # strata
//!
//! An asynchronous virtual file substrate on top of compio's single-threaded
//! completion runtime.
//!
//! Every addressable object is a *file* owned by an [`Isolate`]. Pluggable
//! [`Driver`]s give files their behavior (native binary storage, directories
//! synchronized from disk, program/stream pairs) while the isolate provides
//! the shared machinery every driver relies on:
//!
//! - reference-counted file lifecycle in an arena of stable [`FileId`]s
//! - a typed request protocol answered exactly once ([`Isolate::submit`])
//! - a per-file FIFO [`TaskQueue`] that serializes multi-step native I/O
//! - shared/exclusive per-file locks ([`Isolate::acquire`], [`Isolate::lock`])
//! - multicast change notification ([`Isolate::watch`], [`Isolate::trigger`])
//! - asynchronous path resolution across directories ([`Isolate::pathfind`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use strata::{drivers, Isolate, IsolateConfig, Request};
//!
//! #[compio::main]
//! async fn main() -> strata::Result<()> {
//!     let iso = Isolate::new(IsolateConfig::default());
//!     drivers::register_builtin(&iso)?;
//!
//!     let syncdir = iso.lookup(drivers::syncdir::NAME).expect("registered");
//!     let root = iso.file_new(syncdir, Some("/srv/data".into()))?;
//!
//!     let found = iso.pathfind(root.id(), "docs/readme.txt").await?;
//!     if let Some(file) = found.resolved() {
//!         if let Some(pending) = iso.submit(file.id(), Request::read(0, 4096)) {
//!             let data = pending.await.into_data();
//!             println!("{}", String::from_utf8_lossy(&data));
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod file;
pub mod isolate;
pub mod lock;
pub mod pathfind;
pub mod req;
pub mod stats;
pub mod task_queue;
pub mod watch;

pub use driver::{select, Driver, DriverRegistry, DriverRule};
pub use error::{Result, VfsError};
pub use file::{FileHandle, FileId};
pub use isolate::{Isolate, IsolateConfig, RuleSpec};
pub use lock::{Lock, LockFuture, LockGuard, LockId, LockMode};
pub use pathfind::Pathfind;
pub use req::{
    BinAccess, BinReply, BinRequest, Category, DirAccess, DirEntry, DirReply, DirRequest,
    PendingReply, ProgramAccess, ProgramReply, ProgramRequest, Replier, Reply, Request,
    StreamAccess, StreamReply, StreamRequest,
};
pub use stats::{IoStats, IoStatsSnapshot};
pub use task_queue::TaskQueue;
pub use watch::{EventMask, FileEvent, WatchEvent, WatchId};
