//! Per-file change notification
//!
//! Watchers subscribe to a file with an [`EventMask`] and are called
//! synchronously by [`Isolate::trigger`], in subscription order. Delivery
//! works on a snapshot of the watcher list and never holds an arena borrow
//! across a callback, so callbacks may subscribe, unsubscribe or trigger
//! further events on any file.

use crate::error::{Result, VfsError};
use crate::file::FileId;
use crate::isolate::Isolate;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;
use tracing::{debug, trace};

/// Event delivered to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileEvent {
    /// Content or semantic state changed; stale reads must be discarded
    Update,
    /// The backing native resource changed out of band
    UpdateNative,
    /// Terminal event, delivered once before the file is torn down
    Delete,
}

impl FileEvent {
    /// Mask bit of this event
    #[must_use]
    pub const fn mask(self) -> EventMask {
        match self {
            Self::Update => EventMask::UPDATE,
            Self::UpdateNative => EventMask::UPDATE_NATIVE,
            Self::Delete => EventMask::DELETE,
        }
    }
}

/// Set of events a watcher wants
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventMask(u8);

impl EventMask {
    /// No events
    pub const NONE: Self = Self(0);
    /// [`FileEvent::Update`]
    pub const UPDATE: Self = Self(1);
    /// [`FileEvent::UpdateNative`]
    pub const UPDATE_NATIVE: Self = Self(1 << 1);
    /// [`FileEvent::Delete`]
    pub const DELETE: Self = Self(1 << 2);
    /// Every event
    pub const ALL: Self = Self(0b111);

    /// Whether `event` is in the mask
    #[must_use]
    pub const fn contains(self, event: FileEvent) -> bool {
        self.0 & event.mask().0 != 0
    }
}

impl BitOr for EventMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (FileEvent::Update, "UPDATE"),
            (FileEvent::UpdateNative, "UPDATE_NATIVE"),
            (FileEvent::Delete, "DELETE"),
        ]
        .iter()
        .filter(|(event, _)| self.contains(*event))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "EventMask({})", names.join("|"))
    }
}

/// Handle to one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId {
    file: FileId,
    seq: u64,
}

impl WatchId {
    /// File the subscription is attached to
    #[must_use]
    pub const fn file(self) -> FileId {
        self.file
    }
}

/// What a watcher callback receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent {
    /// Subscription being notified
    pub watch: WatchId,
    /// File the event happened on
    pub file: FileId,
    /// The event
    pub event: FileEvent,
}

type WatchCallback = Rc<dyn Fn(&Isolate, &WatchEvent)>;

/// Registered subscription, stored on the file
pub(crate) struct Watcher {
    seq: u64,
    mask: EventMask,
    once: bool,
    callback: WatchCallback,
}

impl Isolate {
    /// Subscribe to events on a file until [`Isolate::unwatch`]
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoSuchFile`] if the file does not exist or is
    /// being torn down.
    pub fn watch<F>(&self, file: FileId, mask: EventMask, callback: F) -> Result<WatchId>
    where
        F: Fn(&Isolate, &WatchEvent) + 'static,
    {
        self.subscribe(file, mask, false, Rc::new(callback))
    }

    /// Subscribe to the next matching event only
    ///
    /// The subscription is removed before its callback runs.
    ///
    /// # Errors
    ///
    /// Returns [`VfsError::NoSuchFile`] if the file does not exist or is
    /// being torn down.
    pub fn watch_once<F>(&self, file: FileId, mask: EventMask, callback: F) -> Result<WatchId>
    where
        F: Fn(&Isolate, &WatchEvent) + 'static,
    {
        self.subscribe(file, mask, true, Rc::new(callback))
    }

    fn subscribe(
        &self,
        file: FileId,
        mask: EventMask,
        once: bool,
        callback: WatchCallback,
    ) -> Result<WatchId> {
        let seq = self.next_seq();
        let mut files = self.arena().borrow_mut();
        let entry = files
            .get_mut(&file)
            .filter(|e| !e.dying)
            .ok_or(VfsError::NoSuchFile(file))?;
        entry.watchers.push(Watcher {
            seq,
            mask,
            once,
            callback,
        });
        trace!("watch {} on file {} for {:?}", seq, file, mask);
        Ok(WatchId { file, seq })
    }

    /// Remove a subscription
    ///
    /// Returns `false` if it was already gone.
    pub fn unwatch(&self, watch: WatchId) -> bool {
        let removed = {
            let mut files = self.arena().borrow_mut();
            let Some(entry) = files.get_mut(&watch.file) else {
                return false;
            };
            let Some(pos) = entry.watchers.iter().position(|w| w.seq == watch.seq) else {
                return false;
            };
            entry.watchers.remove(pos)
        };
        drop(removed);
        true
    }

    /// Number of live subscriptions on a file
    #[must_use]
    pub fn watcher_count(&self, file: FileId) -> usize {
        self.arena()
            .borrow()
            .get(&file)
            .map_or(0, |e| e.watchers.len())
    }

    /// Deliver an event to every matching subscriber of a file
    ///
    /// Subscribers added during delivery are not called for this event;
    /// subscribers removed during delivery are skipped. [`FileEvent::Delete`]
    /// belongs to teardown and is ignored here, as is any event on a file
    /// that is being torn down.
    pub fn trigger(&self, file: FileId, event: FileEvent) {
        if event == FileEvent::Delete {
            debug!("ignoring DELETE triggered on live file {}", file);
            return;
        }
        if self.is_dying(file) {
            return;
        }
        self.deliver_event(file, event);
    }

    /// Deliver without the public checks; teardown sends DELETE through here
    pub(crate) fn deliver_event(&self, file: FileId, event: FileEvent) {
        let snapshot: Vec<u64> = {
            let files = self.arena().borrow();
            let Some(entry) = files.get(&file) else {
                return;
            };
            entry
                .watchers
                .iter()
                .filter(|w| w.mask.contains(event))
                .map(|w| w.seq)
                .collect()
        };
        trace!("trigger {:?} on file {} ({} watchers)", event, file, snapshot.len());

        for seq in snapshot {
            let callback = {
                let mut files = self.arena().borrow_mut();
                let Some(entry) = files.get_mut(&file) else {
                    return;
                };
                let Some(pos) = entry.watchers.iter().position(|w| w.seq == seq) else {
                    continue;
                };
                if entry.watchers[pos].once {
                    entry.watchers.remove(pos).callback
                } else {
                    Rc::clone(&entry.watchers[pos].callback)
                }
            };
            let watch_event = WatchEvent {
                watch: WatchId { file, seq },
                file,
                event,
            };
            callback(self, &watch_event);
        }
    }
}
