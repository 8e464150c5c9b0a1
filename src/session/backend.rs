//! Session backend abstraction
//!
//! A backend grants privileged access to device nodes and owns whatever
//! VT or login-service state that requires. Two implementations exist:
//! - libseat (seatd or logind, no root needed), behind the `seatd` feature
//! - direct VT ioctls (requires root)
//!
//! The session picks one at creation by probing in priority order.

use std::io;
use std::os::fd::{OwnedFd, RawFd};
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};
use crate::event_loop::LoopHandle;

/// Privileged device access
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Release VT ownership, signal handlers and service connections.
    /// Must be safe to call more than once.
    fn destroy(&mut self);

    /// Privileged open of a device node
    fn open(&mut self, path: &Path) -> io::Result<OwnedFd>;

    /// Privileged close of an fd previously returned by `open`
    fn close(&mut self, fd: OwnedFd);

    /// Request a switch to virtual terminal `vt`
    fn change_vt(&mut self, vt: u32) -> bool;

    /// Whether the seat/VT is ours right now
    fn is_active(&self) -> bool {
        true
    }

    /// Pollable fd for VT/seat notifications, if the backend has one
    fn event_fd(&self) -> Option<RawFd> {
        None
    }

    /// Handle pending notifications on `event_fd`.
    ///
    /// Returns the new active state if it changed.
    fn dispatch(&mut self) -> Option<bool> {
        None
    }
}

/// Backend constructor; fails when its prerequisites are missing
pub type CreateFn = Box<dyn Fn(&LoopHandle) -> anyhow::Result<Box<dyn Backend>>>;

/// Named entry of the probe list
pub struct BackendProbe {
    pub name: &'static str,
    pub create: CreateFn,
}

impl BackendProbe {
    pub fn new<F>(name: &'static str, create: F) -> Self
    where
        F: Fn(&LoopHandle) -> anyhow::Result<Box<dyn Backend>> + 'static,
    {
        Self {
            name,
            create: Box::new(create),
        }
    }
}

/// Which backends the session may try
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Full priority list
    #[default]
    Auto,
    Seatd,
    Direct,
}

/// Probe list in priority order, filtered by `choice`
pub fn probes_for(choice: BackendChoice) -> Vec<BackendProbe> {
    let mut probes = Vec::new();

    #[cfg(feature = "seatd")]
    if matches!(choice, BackendChoice::Auto | BackendChoice::Seatd) {
        probes.push(BackendProbe::new("seatd", super::seatd::SeatBackend::create));
    }
    #[cfg(not(feature = "seatd"))]
    if choice == BackendChoice::Seatd {
        warn!("seatd backend requested but not compiled in");
    }

    if matches!(choice, BackendChoice::Auto | BackendChoice::Direct) {
        probes.push(BackendProbe::new("direct", super::direct::DirectBackend::create));
    }

    probes
}

/// Default priority list: seatd (if compiled in), then direct
pub fn default_probes() -> Vec<BackendProbe> {
    probes_for(BackendChoice::Auto)
}

/// Use the first backend whose probe succeeds
pub fn select(probes: &[BackendProbe], event_loop: &LoopHandle) -> Result<Box<dyn Backend>> {
    for probe in probes {
        match (probe.create)(event_loop) {
            Ok(backend) => {
                info!("Using {} session backend", probe.name);
                return Ok(backend);
            }
            Err(e) => info!("{} session backend unavailable: {:#}", probe.name, e),
        }
    }
    warn!("Failed to load session backend");
    Err(SessionError::NoBackendAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::PollLoop;
    use crate::session::testing::FakeBackend;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn handle() -> LoopHandle {
        Rc::new(RefCell::new(PollLoop::new()))
    }

    #[test]
    fn test_select_first_success_in_order() {
        let tried = Rc::new(RefCell::new(Vec::new()));
        let t1 = tried.clone();
        let t2 = tried.clone();
        let t3 = tried.clone();
        let probes = vec![
            BackendProbe::new("broken", move |_| {
                t1.borrow_mut().push("broken");
                Err(anyhow::anyhow!("no service"))
            }),
            BackendProbe::new("fake", move |_| {
                t2.borrow_mut().push("fake");
                Ok(Box::new(FakeBackend::default()) as Box<dyn Backend>)
            }),
            BackendProbe::new("never", move |_| {
                t3.borrow_mut().push("never");
                Ok(Box::new(FakeBackend::default()) as Box<dyn Backend>)
            }),
        ];

        let backend = select(&probes, &handle()).expect("fake backend");
        assert_eq!(backend.name(), "fake");
        assert_eq!(*tried.borrow(), vec!["broken", "fake"]);
    }

    #[test]
    fn test_select_none_available() {
        let probes = vec![BackendProbe::new("broken", |_| Err(anyhow::anyhow!("nope")))];
        assert!(matches!(
            select(&probes, &handle()),
            Err(SessionError::NoBackendAvailable)
        ));
        assert!(matches!(
            select(&[], &handle()),
            Err(SessionError::NoBackendAvailable)
        ));
    }

    #[test]
    fn test_probe_order() {
        let names: Vec<_> = default_probes().iter().map(|p| p.name).collect();
        #[cfg(feature = "seatd")]
        assert_eq!(names, vec!["seatd", "direct"]);
        #[cfg(not(feature = "seatd"))]
        assert_eq!(names, vec!["direct"]);

        let names: Vec<_> = probes_for(BackendChoice::Direct)
            .iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["direct"]);
    }
}
