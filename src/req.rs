//! Typed request protocol
//!
//! A [`Request`] names one operation within a [`Category`]. Submitting it
//! hands it synchronously to the target file's driver, which either rejects
//! it on the spot or promises exactly one [`Reply`].
//!
//! The promise is a one-shot channel: the driver answers through the
//! [`Replier`] it was given, the caller awaits the matching [`PendingReply`].
//! A replier that is dropped unanswered (an aborted task, a failed native
//! step, a file torn down with work pending) delivers the request's
//! zero-effect reply instead, so an accepted request is never lost.

use crate::file::{FileHandle, FileId};
use crate::isolate::Isolate;
use futures::channel::oneshot;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, trace};

/// Request category a driver can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Random-access binary data
    Bin,
    /// Named children
    Dir,
    /// Executable programs producing streams
    Program,
    /// Bidirectional byte streams
    Stream,
}

// ============================================================================
// REQUESTS
// ============================================================================

/// Binary I/O operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinRequest {
    /// Query read/write capability
    Access,
    /// Read up to `size` bytes at `offset`
    Read {
        /// Byte offset
        offset: u64,
        /// Maximum number of bytes
        size: usize,
    },
    /// Write `data` at `offset`
    Write {
        /// Byte offset
        offset: u64,
        /// Bytes to write
        data: Vec<u8>,
    },
}

/// Directory operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirRequest {
    /// Query supported directory operations
    Access,
    /// List every current entry
    List,
    /// Look up one entry by exact name
    Find {
        /// Entry name
        name: String,
    },
    /// Add an entry; the directory takes its own reference on `file`
    Add {
        /// Entry name
        name: String,
        /// File to link
        file: FileId,
    },
    /// Remove an entry, releasing the directory's reference
    Remove {
        /// Entry name
        name: String,
    },
}

/// Program operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramRequest {
    /// Query exec capability
    Access,
    /// Start a session, producing a new stream file
    Exec,
}

/// Stream operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamRequest {
    /// Query input/output capability
    Access,
    /// Push bytes into the stream
    Input {
        /// Payload
        data: Vec<u8>,
    },
    /// Drain bytes the stream has produced
    Output,
}

/// One operation against a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Binary I/O
    Bin(BinRequest),
    /// Directory
    Dir(DirRequest),
    /// Program
    Program(ProgramRequest),
    /// Stream I/O
    Stream(StreamRequest),
}

impl Request {
    /// Category implied by the operation
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::Bin(_) => Category::Bin,
            Self::Dir(_) => Category::Dir,
            Self::Program(_) => Category::Program,
            Self::Stream(_) => Category::Stream,
        }
    }

    /// `Bin::Read` shorthand
    #[must_use]
    pub const fn read(offset: u64, size: usize) -> Self {
        Self::Bin(BinRequest::Read { offset, size })
    }

    /// `Bin::Write` shorthand
    #[must_use]
    pub const fn write(offset: u64, data: Vec<u8>) -> Self {
        Self::Bin(BinRequest::Write { offset, data })
    }

    /// `Dir::Find` shorthand
    #[must_use]
    pub fn find(name: impl Into<String>) -> Self {
        Self::Dir(DirRequest::Find { name: name.into() })
    }

    /// `Dir::List` shorthand
    #[must_use]
    pub const fn list() -> Self {
        Self::Dir(DirRequest::List)
    }

    /// Reply reporting that the operation had no effect
    #[must_use]
    pub fn zero_reply(&self) -> Reply {
        match self {
            Self::Bin(BinRequest::Access) => Reply::Bin(BinReply::Access(BinAccess::default())),
            Self::Bin(BinRequest::Read { offset, .. }) => Reply::Bin(BinReply::Read {
                offset: *offset,
                data: Vec::new(),
            }),
            Self::Bin(BinRequest::Write { offset, .. }) => Reply::Bin(BinReply::Write {
                offset: *offset,
                size: 0,
            }),
            Self::Dir(DirRequest::Access) => Reply::Dir(DirReply::Access(DirAccess::default())),
            Self::Dir(DirRequest::List) => Reply::Dir(DirReply::List(Vec::new())),
            Self::Dir(DirRequest::Find { .. }) => Reply::Dir(DirReply::Find(None)),
            Self::Dir(DirRequest::Add { .. }) => Reply::Dir(DirReply::Add(false)),
            Self::Dir(DirRequest::Remove { .. }) => Reply::Dir(DirReply::Remove(false)),
            Self::Program(ProgramRequest::Access) => {
                Reply::Program(ProgramReply::Access(ProgramAccess::default()))
            }
            Self::Program(ProgramRequest::Exec) => Reply::Program(ProgramReply::Exec(None)),
            Self::Stream(StreamRequest::Access) => {
                Reply::Stream(StreamReply::Access(StreamAccess::default()))
            }
            Self::Stream(StreamRequest::Input { .. }) => {
                Reply::Stream(StreamReply::Input { consumed: 0 })
            }
            Self::Stream(StreamRequest::Output) => Reply::Stream(StreamReply::Output {
                data: Vec::new(),
            }),
        }
    }
}

// ============================================================================
// REPLIES
// ============================================================================

/// Binary capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BinAccess {
    /// Reads are allowed
    pub read: bool,
    /// Writes are allowed
    pub write: bool,
}

/// Directory capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)] // One flag per operation
pub struct DirAccess {
    /// `List` is answered
    pub list: bool,
    /// `Find` is answered
    pub find: bool,
    /// `Add` is answered
    pub add: bool,
    /// `Remove` is answered
    pub remove: bool,
}

/// Program capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgramAccess {
    /// `Exec` is answered
    pub exec: bool,
}

/// Stream capability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamAccess {
    /// `Input` is answered
    pub input: bool,
    /// `Output` is answered
    pub output: bool,
}

/// A named directory entry
///
/// The file id is a weak edge: the directory owns the reference, so take one
/// with [`Isolate::hold`] before relying on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry name
    pub name: String,
    /// File the entry points at
    pub file: FileId,
}

/// Binary replies
#[derive(Debug, PartialEq, Eq)]
pub enum BinReply {
    /// Capability
    Access(BinAccess),
    /// Bytes read; shorter than requested at end of data, empty at or past EOF
    Read {
        /// Offset the read started at
        offset: u64,
        /// Bytes read
        data: Vec<u8>,
    },
    /// Bytes actually written
    Write {
        /// Offset the write started at
        offset: u64,
        /// Number of bytes written
        size: usize,
    },
}

/// Directory replies
#[derive(Debug, PartialEq, Eq)]
pub enum DirReply {
    /// Capability
    Access(DirAccess),
    /// Full current entry set
    List(Vec<DirEntry>),
    /// Located entry, if any
    Find(Option<DirEntry>),
    /// Whether the entry was added
    Add(bool),
    /// Whether the entry was removed
    Remove(bool),
}

/// Program replies
#[derive(Debug, PartialEq, Eq)]
pub enum ProgramReply {
    /// Capability
    Access(ProgramAccess),
    /// New stream file owned by the caller, if exec succeeded
    Exec(Option<FileHandle>),
}

/// Stream replies
#[derive(Debug, PartialEq, Eq)]
pub enum StreamReply {
    /// Capability
    Access(StreamAccess),
    /// Number of input bytes the stream accepted
    Input {
        /// Bytes consumed
        consumed: usize,
    },
    /// Output drained from the stream
    Output {
        /// Payload
        data: Vec<u8>,
    },
}

/// Completion of a request
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    /// Binary I/O
    Bin(BinReply),
    /// Directory
    Dir(DirReply),
    /// Program
    Program(ProgramReply),
    /// Stream I/O
    Stream(StreamReply),
}

impl Reply {
    /// Payload of a binary read or stream output; empty otherwise
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        match self {
            Self::Bin(BinReply::Read { data, .. }) | Self::Stream(StreamReply::Output { data }) => {
                data
            }
            _ => Vec::new(),
        }
    }

    /// Bytes written by a binary write; zero otherwise
    #[must_use]
    pub const fn written(&self) -> usize {
        match self {
            Self::Bin(BinReply::Write { size, .. }) => *size,
            _ => 0,
        }
    }

    /// Entry located by a directory find
    #[must_use]
    pub fn into_entry(self) -> Option<DirEntry> {
        match self {
            Self::Dir(DirReply::Find(entry)) => entry,
            _ => None,
        }
    }

    /// Entries returned by a directory list
    #[must_use]
    pub fn into_entries(self) -> Vec<DirEntry> {
        match self {
            Self::Dir(DirReply::List(entries)) => entries,
            _ => Vec::new(),
        }
    }

    /// Stream file produced by a program exec
    #[must_use]
    pub fn into_exec(self) -> Option<FileHandle> {
        match self {
            Self::Program(ProgramReply::Exec(file)) => file,
            _ => None,
        }
    }

    /// Outcome flag of a directory add/remove
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(
            self,
            Self::Dir(DirReply::Add(true) | DirReply::Remove(true))
        )
    }
}

// ============================================================================
// CONTINUATION
// ============================================================================

/// Driver side of a request's continuation
///
/// Answer with [`Replier::send`]. Dropping it unanswered sends the request's
/// zero-effect reply.
pub struct Replier {
    tx: Option<oneshot::Sender<Reply>>,
    zero: Option<Reply>,
}

impl Replier {
    /// Complete the request
    pub fn send(mut self, reply: Reply) {
        if let Some(tx) = self.tx.take() {
            // The caller may have stopped waiting
            let _ = tx.send(reply);
        }
    }

    /// Complete the request with its zero-effect reply
    pub fn abort(mut self) {
        self.finish_zero();
    }

    fn finish_zero(&mut self) {
        if let (Some(tx), Some(zero)) = (self.tx.take(), self.zero.take()) {
            let _ = tx.send(zero);
        }
    }
}

impl Drop for Replier {
    fn drop(&mut self) {
        if self.tx.is_some() {
            trace!("request completed without an explicit reply");
            self.finish_zero();
        }
    }
}

/// Caller side of a request's continuation
///
/// Resolves exactly once with the driver's reply.
pub struct PendingReply {
    rx: oneshot::Receiver<Reply>,
    zero: Option<Reply>,
}

impl Future for PendingReply {
    type Output = Reply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(reply)) => Poll::Ready(reply),
            Poll::Ready(Err(oneshot::Canceled)) => match self.zero.take() {
                Some(zero) => Poll::Ready(zero),
                None => Poll::Pending,
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Isolate {
    /// Dispatch a request to a file's driver
    ///
    /// The driver's `handle` runs before this returns. `None` means the
    /// request was rejected outright (unknown file, file being torn down,
    /// category not answered, operation unsupported) and no reply will ever
    /// come. `Some` resolves
    /// exactly once.
    #[must_use]
    pub fn submit(&self, file: FileId, request: Request) -> Option<PendingReply> {
        if self.is_dying(file) {
            debug!("file {} is being torn down; request rejected", file);
            return None;
        }
        let driver = self.driver_of(file)?;
        let category = request.category();
        if !driver.answers(category) {
            debug!(
                "driver '{}' does not answer {:?} requests",
                driver.name(),
                category
            );
            return None;
        }

        let (tx, rx) = oneshot::channel();
        let pending = PendingReply {
            rx,
            zero: Some(request.zero_reply()),
        };
        let replier = Replier {
            tx: Some(tx),
            zero: Some(request.zero_reply()),
        };
        driver
            .handle(self, file, request, replier)
            .then_some(pending)
    }
}
