//! In-memory backend and udev stand-ins for session tests
//!
//! The fake backend opens real character devices (/dev/null, /dev/zero,
//! /dev/full) so fstat hands back real device numbers.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::backend::{Backend, BackendProbe};
use super::Session;
use crate::drm::subsystem::{CardNode, ChangeRecord, HotplugSource, Subsystem};
use crate::event_loop::{LoopHandle, PollLoop};

/// What the fake backend was asked to do
#[derive(Debug)]
pub struct BackendLog {
    pub opened: Vec<PathBuf>,
    pub closed: Vec<RawFd>,
    pub destroyed: usize,
    pub vt_requests: Vec<u32>,
    pub vt_ok: bool,
    /// Reported by `is_active` right after the probe
    pub initially_active: bool,
    /// Returned (once) by the next `dispatch`
    pub queued_active: Option<bool>,
}

impl Default for BackendLog {
    fn default() -> Self {
        Self {
            opened: Vec::new(),
            closed: Vec::new(),
            destroyed: 0,
            vt_requests: Vec::new(),
            vt_ok: true,
            initially_active: true,
            queued_active: None,
        }
    }
}

pub struct FakeBackend {
    log: Rc<RefCell<BackendLog>>,
    events: Option<(UnixStream, UnixStream)>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(BackendLog::default())), false)
    }
}

impl FakeBackend {
    pub fn new(log: Rc<RefCell<BackendLog>>, with_events: bool) -> Self {
        let events = with_events.then(|| UnixStream::pair().expect("socketpair"));
        Self { log, events }
    }
}

impl Backend for FakeBackend {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn destroy(&mut self) {
        self.log.borrow_mut().destroyed += 1;
    }

    fn open(&mut self, path: &Path) -> io::Result<OwnedFd> {
        let file = File::open(path)?;
        self.log.borrow_mut().opened.push(path.to_path_buf());
        Ok(OwnedFd::from(file))
    }

    fn close(&mut self, fd: OwnedFd) {
        self.log.borrow_mut().closed.push(fd.as_raw_fd());
    }

    fn change_vt(&mut self, vt: u32) -> bool {
        let mut log = self.log.borrow_mut();
        log.vt_requests.push(vt);
        log.vt_ok
    }

    fn is_active(&self) -> bool {
        self.log.borrow().initially_active
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.events.as_ref().map(|(_, rx)| rx.as_raw_fd())
    }

    fn dispatch(&mut self) -> Option<bool> {
        self.log.borrow_mut().queued_active.take()
    }
}

/// Enumerated card; `node` None makes resolution fail
#[derive(Debug, Clone)]
pub struct FakeCard {
    pub syspath: PathBuf,
    pub node: Option<CardNode>,
}

impl FakeCard {
    pub fn new(sysname: &str, devnode: &str, boot_vga: bool) -> Self {
        Self {
            syspath: PathBuf::from(format!("/sys/class/drm/{}", sysname)),
            node: Some(CardNode {
                sysname: sysname.to_string(),
                devnode: Some(PathBuf::from(devnode)),
                boot_vga,
            }),
        }
    }

    pub fn unresolvable(sysname: &str) -> Self {
        Self {
            syspath: PathBuf::from(format!("/sys/class/drm/{}", sysname)),
            node: None,
        }
    }
}

/// Shared state behind the fake udev context and monitor
#[derive(Clone, Default)]
pub struct FakeHw {
    pub created: Rc<Cell<usize>>,
    pub released: Rc<Cell<usize>>,
    pub monitors_dropped: Rc<Cell<usize>>,
    pub teardown: Rc<RefCell<Vec<&'static str>>>,
    pub fail_monitor: Rc<Cell<bool>>,
    /// Monitor reports fd -1, which the poll loop refuses
    pub bad_monitor_fd: Rc<Cell<bool>>,
    pub fail_enumerate: Rc<Cell<bool>>,
    pub subsystems: Rc<RefCell<Vec<String>>>,
    pub records: Rc<RefCell<VecDeque<ChangeRecord>>>,
    pub cards: Rc<RefCell<Vec<FakeCard>>>,
}

impl FakeHw {
    pub fn boxed(&self) -> io::Result<Box<dyn Subsystem>> {
        self.created.set(self.created.get() + 1);
        Ok(Box::new(FakeContext { hw: self.clone() }))
    }

    pub fn push(&self, record: ChangeRecord) {
        self.records.borrow_mut().push_back(record);
    }

    pub fn set_cards(&self, cards: Vec<FakeCard>) {
        *self.cards.borrow_mut() = cards;
    }
}

struct FakeContext {
    hw: FakeHw,
}

impl Subsystem for FakeContext {
    fn monitor(&self, subsystem: &str) -> io::Result<Box<dyn HotplugSource>> {
        if self.hw.fail_monitor.get() {
            return Err(io::Error::from_raw_os_error(libc::EPROTONOSUPPORT));
        }
        self.hw.subsystems.borrow_mut().push(subsystem.to_string());
        Ok(Box::new(FakeMonitor {
            hw: self.hw.clone(),
            socket: UnixStream::pair()?,
        }))
    }

    fn enumerate(&self, _subsystem: &str, _sysname: &str) -> io::Result<Vec<PathBuf>> {
        if self.hw.fail_enumerate.get() {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        Ok(self.hw.cards.borrow().iter().map(|c| c.syspath.clone()).collect())
    }

    fn resolve(&self, syspath: &Path) -> io::Result<CardNode> {
        self.hw
            .cards
            .borrow()
            .iter()
            .find(|c| c.syspath == syspath)
            .and_then(|c| c.node.clone())
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENOENT))
    }
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.hw.released.set(self.hw.released.get() + 1);
        self.hw.teardown.borrow_mut().push("context");
    }
}

struct FakeMonitor {
    hw: FakeHw,
    socket: (UnixStream, UnixStream),
}

impl HotplugSource for FakeMonitor {
    fn fd(&self) -> RawFd {
        if self.hw.bad_monitor_fd.get() {
            return -1;
        }
        self.socket.1.as_raw_fd()
    }

    fn receive(&mut self) -> Option<ChangeRecord> {
        self.hw.records.borrow_mut().pop_front()
    }
}

impl Drop for FakeMonitor {
    fn drop(&mut self) {
        self.hw.monitors_dropped.set(self.hw.monitors_dropped.get() + 1);
        self.hw.teardown.borrow_mut().push("monitor");
    }
}

/// Loop, backend log and udev state wired together
pub struct Harness {
    pub poll_loop: Rc<RefCell<PollLoop>>,
    pub backend: Rc<RefCell<BackendLog>>,
    pub hw: FakeHw,
    backend_events: bool,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            poll_loop: Rc::new(RefCell::new(PollLoop::new())),
            backend: Rc::new(RefCell::new(BackendLog::default())),
            hw: FakeHw::default(),
            backend_events: false,
        }
    }

    /// Backend exposes a notification fd
    pub fn with_backend_events() -> Self {
        Self {
            backend_events: true,
            ..Self::new()
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.poll_loop.clone()
    }

    pub fn probes(&self) -> Vec<BackendProbe> {
        let log = self.backend.clone();
        let events = self.backend_events;
        vec![BackendProbe::new("fake", move |_| {
            Ok(Box::new(FakeBackend::new(log.clone(), events)) as Box<dyn Backend>)
        })]
    }

    pub fn session(&self) -> Session {
        let hw = self.hw.clone();
        Session::create_with(&self.handle(), &self.probes(), move || hw.boxed())
            .expect("fake session")
    }
}

pub fn change(action: &str, dev: libc::dev_t) -> ChangeRecord {
    ChangeRecord {
        action: Some(action.to_string()),
        devnum: Some(dev),
        sysname: "card0".to_string(),
    }
}
