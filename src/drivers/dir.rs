//! In-memory directory driver
//!
//! Entries are owning edges: `Add` takes a reference on the child and
//! `Remove` (or teardown of the directory) gives it back. Every change
//! triggers [`FileEvent::Update`] on the directory.

use crate::driver::Driver;
use crate::drivers::Children;
use crate::error::Result;
use crate::file::FileId;
use crate::isolate::Isolate;
use crate::req::{Category, DirAccess, DirReply, DirRequest, Replier, Reply, Request};
use crate::watch::FileEvent;
use std::cell::RefCell;
use tracing::debug;

/// Registered name
pub const NAME: &str = "dir";

type DirState = RefCell<Children>;

/// In-memory directory
pub struct DirDriver;

impl Driver for DirDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn categories(&self) -> &[Category] {
        &[Category::Dir]
    }

    fn init(&self, iso: &Isolate, file: FileId) -> Result<()> {
        iso.set_state(file, std::rc::Rc::new(DirState::default()));
        Ok(())
    }

    fn deinit(&self, iso: &Isolate, file: FileId) {
        let Some(state) = iso.take_state::<DirState>(file) else {
            return;
        };
        let children = state.borrow_mut().take_all();
        debug!("dir {} releasing {} entries", file, children.len());
        drop(children);
    }

    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool {
        let Request::Dir(request) = request else {
            return false;
        };
        let Some(state) = iso.state::<DirState>(file) else {
            return false;
        };

        match request {
            DirRequest::Access => reply.send(Reply::Dir(DirReply::Access(DirAccess {
                list: true,
                find: true,
                add: true,
                remove: true,
            }))),
            DirRequest::List => {
                let entries = state.borrow().list();
                reply.send(Reply::Dir(DirReply::List(entries)));
            }
            DirRequest::Find { name } => {
                let entry = state.borrow().find(&name);
                reply.send(Reply::Dir(DirReply::Find(entry)));
            }
            DirRequest::Add { name, file: child } => {
                let Some(hold) = iso.hold(child) else {
                    reply.send(Reply::Dir(DirReply::Add(false)));
                    return true;
                };
                let inserted = state.borrow_mut().insert(name, hold);
                match inserted {
                    Ok(()) => {
                        reply.send(Reply::Dir(DirReply::Add(true)));
                        iso.trigger(file, FileEvent::Update);
                    }
                    Err(rejected) => {
                        drop(rejected);
                        reply.send(Reply::Dir(DirReply::Add(false)));
                    }
                }
            }
            DirRequest::Remove { name } => {
                let removed = state.borrow_mut().remove(&name);
                let found = removed.is_some();
                // Released outside the borrow: the child may be torn down here
                drop(removed);
                reply.send(Reply::Dir(DirReply::Remove(found)));
                if found {
                    iso.trigger(file, FileEvent::Update);
                }
            }
        }
        true
    }
}
