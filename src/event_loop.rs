//! Host event loop integration
//!
//! The session registers file descriptors for read readiness. The loop
//! reports ready sources back as [`SourceId`]s and the owner of a source
//! dispatches it (see `Session::dispatch`).

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;

use log::{trace, warn};

/// Token identifying one registered fd
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Read-readiness registration contract
pub trait EventLoop {
    fn add_fd(&mut self, fd: RawFd) -> io::Result<SourceId>;
    fn remove(&mut self, id: SourceId);
}

/// Shared handle to the host loop (single-threaded)
pub type LoopHandle = Rc<RefCell<dyn EventLoop>>;

/// Registration guard: removes its fd from the loop when dropped
pub struct EventSource {
    id: SourceId,
    handle: LoopHandle,
}

impl EventSource {
    pub fn register(handle: &LoopHandle, fd: RawFd) -> io::Result<Self> {
        let id = handle.borrow_mut().add_fd(fd)?;
        Ok(Self {
            id,
            handle: handle.clone(),
        })
    }

    pub fn id(&self) -> SourceId {
        self.id
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        match self.handle.try_borrow_mut() {
            Ok(mut event_loop) => event_loop.remove(self.id),
            Err(_) => warn!("event loop busy, leaking source {:?}", self.id),
        }
    }
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventSource").field(&self.id).finish()
    }
}

/// Minimal `poll(2)` loop used by the binary
#[derive(Debug, Default)]
pub struct PollLoop {
    sources: Vec<(SourceId, RawFd)>,
    next_id: u64,
}

impl PollLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Block until at least one source is readable or `timeout_ms` passes.
    ///
    /// A negative timeout waits forever. Interruption by a signal returns
    /// an empty list so the caller can check its shutdown flag.
    pub fn wait(&self, timeout_ms: i32) -> io::Result<Vec<SourceId>> {
        let mut fds: Vec<libc::pollfd> = self
            .sources
            .iter()
            .map(|&(_, fd)| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let ready: Vec<SourceId> = fds
            .iter()
            .zip(self.sources.iter())
            .filter(|(p, _)| p.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
            .map(|(_, &(id, _))| id)
            .collect();
        trace!("poll: {} ready", ready.len());
        Ok(ready)
    }
}

impl EventLoop for PollLoop {
    fn add_fd(&mut self, fd: RawFd) -> io::Result<SourceId> {
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.sources.push((id, fd));
        Ok(id)
    }

    fn remove(&mut self, id: SourceId) {
        self.sources.retain(|(sid, _)| *sid != id);
    }
}
