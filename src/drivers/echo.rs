//! Echo program and its stream sessions
//!
//! `echo` is a program: every `Exec` produces a fresh `echo.stream` file
//! owned by the caller. Input written to a stream is buffered, up to the
//! isolate's stream buffer limit, and comes back out of `Output`.

use crate::driver::Driver;
use crate::error::Result;
use crate::file::FileId;
use crate::isolate::Isolate;
use crate::req::{
    Category, ProgramAccess, ProgramReply, ProgramRequest, Replier, Reply, Request, StreamAccess,
    StreamReply, StreamRequest,
};
use crate::watch::FileEvent;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, warn};

/// Registered name of the program
pub const NAME: &str = "echo";

/// Registered name of its sessions
pub const STREAM_NAME: &str = "echo.stream";

/// Echo program
pub struct EchoDriver;

impl Driver for EchoDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn categories(&self) -> &[Category] {
        &[Category::Program]
    }

    fn init(&self, _iso: &Isolate, _file: FileId) -> Result<()> {
        Ok(())
    }

    fn deinit(&self, _iso: &Isolate, _file: FileId) {}

    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool {
        let Request::Program(request) = request else {
            return false;
        };
        match request {
            ProgramRequest::Access => {
                reply.send(Reply::Program(ProgramReply::Access(ProgramAccess {
                    exec: true,
                })));
            }
            ProgramRequest::Exec => {
                let session = iso
                    .lookup(STREAM_NAME)
                    .map(|driver| iso.file_new(driver, None));
                match session {
                    Some(Ok(stream)) => {
                        debug!("echo {} started session {}", file, stream.id());
                        reply.send(Reply::Program(ProgramReply::Exec(Some(stream))));
                    }
                    Some(Err(e)) => {
                        warn!("echo {} failed to start a session: {}", file, e);
                        reply.abort();
                    }
                    None => {
                        warn!("driver '{}' is not registered", STREAM_NAME);
                        reply.abort();
                    }
                }
            }
        }
        true
    }
}

type StreamBuffer = RefCell<Vec<u8>>;

/// Echo session
pub struct EchoStreamDriver;

impl Driver for EchoStreamDriver {
    fn name(&self) -> &str {
        STREAM_NAME
    }

    fn categories(&self) -> &[Category] {
        &[Category::Stream]
    }

    fn init(&self, iso: &Isolate, file: FileId) -> Result<()> {
        iso.set_state(file, Rc::new(StreamBuffer::default()));
        Ok(())
    }

    fn deinit(&self, iso: &Isolate, file: FileId) {
        if let Some(buffer) = iso.take_state::<StreamBuffer>(file) {
            let pending = buffer.borrow().len();
            if pending > 0 {
                debug!("echo session {} dropped {} unread bytes", file, pending);
            }
        }
    }

    fn handle(&self, iso: &Isolate, file: FileId, request: Request, reply: Replier) -> bool {
        let Request::Stream(request) = request else {
            return false;
        };
        let Some(buffer) = iso.state::<StreamBuffer>(file) else {
            return false;
        };

        match request {
            StreamRequest::Access => {
                reply.send(Reply::Stream(StreamReply::Access(StreamAccess {
                    input: true,
                    output: true,
                })));
            }
            StreamRequest::Input { data } => {
                let consumed = {
                    let mut buffer = buffer.borrow_mut();
                    let room = iso.config().stream_buffer_max.saturating_sub(buffer.len());
                    let consumed = data.len().min(room);
                    buffer.extend_from_slice(&data[..consumed]);
                    consumed
                };
                reply.send(Reply::Stream(StreamReply::Input { consumed }));
                if consumed > 0 {
                    iso.trigger(file, FileEvent::Update);
                }
            }
            StreamRequest::Output => {
                let data = std::mem::take(&mut *buffer.borrow_mut());
                reply.send(Reply::Stream(StreamReply::Output { data }));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]
    use super::*;
    use crate::isolate::IsolateConfig;

    fn setup(stream_buffer_max: usize) -> Isolate {
        let iso = Isolate::new(IsolateConfig {
            stream_buffer_max,
            ..IsolateConfig::default()
        });
        iso.register(Rc::new(EchoDriver)).expect("register");
        iso.register(Rc::new(EchoStreamDriver)).expect("register");
        iso
    }

    fn input(data: &[u8]) -> Request {
        Request::Stream(StreamRequest::Input {
            data: data.to_vec(),
        })
    }

    #[compio::test]
    async fn test_exec_yields_owned_stream() {
        let iso = setup(1024);
        let program = iso
            .file_new(iso.lookup(NAME).expect("registered"), None)
            .expect("create");

        let stream = iso
            .submit(program.id(), Request::Program(ProgramRequest::Exec))
            .expect("exec accepted")
            .await
            .into_exec()
            .expect("session started");
        assert_eq!(iso.refcount(stream.id()), Some(1));

        let reply = iso
            .submit(stream.id(), input(b"ping"))
            .expect("input accepted")
            .await;
        assert_eq!(reply, Reply::Stream(StreamReply::Input { consumed: 4 }));

        let out = iso
            .submit(stream.id(), Request::Stream(StreamRequest::Output))
            .expect("output accepted")
            .await;
        assert_eq!(out.into_data(), b"ping");

        let drained = iso
            .submit(stream.id(), Request::Stream(StreamRequest::Output))
            .expect("output accepted")
            .await;
        assert!(drained.into_data().is_empty());
    }

    #[compio::test]
    async fn test_input_is_bounded() {
        let iso = setup(6);
        let stream = iso
            .file_new(iso.lookup(STREAM_NAME).expect("registered"), None)
            .expect("create");

        let first = iso.submit(stream.id(), input(b"abcd")).expect("accepted").await;
        let second = iso.submit(stream.id(), input(b"efgh")).expect("accepted").await;
        assert_eq!(first, Reply::Stream(StreamReply::Input { consumed: 4 }));
        assert_eq!(second, Reply::Stream(StreamReply::Input { consumed: 2 }));
    }

    #[test]
    fn test_program_rejects_stream_requests() {
        let iso = setup(16);
        let program = iso
            .file_new(iso.lookup(NAME).expect("registered"), None)
            .expect("create");
        assert!(iso.submit(program.id(), input(b"x")).is_none());
    }
}
