//! libseat session backend
//!
//! Rootless device access brokered by seatd or logind. Devices are opened
//! by the seat daemon; the session gets a dup of each fd.

use std::cell::RefCell;
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::rc::Rc;
use std::sync::mpsc;

use anyhow::{Context, Result};
use libseat::{Seat, SeatEvent, SeatRef};
use log::{debug, info, trace, warn};

use super::backend::Backend;
use crate::event_loop::LoopHandle;

/// Seat state change reported by the libseat callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeatChange {
    Enable,
    Disable,
}

/// State shared with the libseat callback
struct SeatState {
    event_tx: mpsc::Sender<SeatChange>,
    active: bool,
}

/// Device opened through libseat, keyed by the dup'd fd handed out
struct SeatDevice {
    fd: RawFd,
    device: libseat::Device,
}

/// libseat-backed session
pub struct SeatBackend {
    /// None once destroyed
    seat: Option<Seat>,
    state: Rc<RefCell<SeatState>>,
    event_rx: mpsc::Receiver<SeatChange>,
    seat_fd: Option<RawFd>,
    devices: Vec<SeatDevice>,
}

impl SeatBackend {
    /// Probe: succeeds when seatd or logind accepts us
    pub fn create(_event_loop: &LoopHandle) -> Result<Box<dyn Backend>> {
        let (event_tx, event_rx) = mpsc::channel();

        let state = Rc::new(RefCell::new(SeatState {
            event_tx,
            active: false,
        }));
        let state_clone = state.clone();

        let mut seat = Seat::open(move |seat_ref: &mut SeatRef, event: SeatEvent| {
            let mut state = state_clone.borrow_mut();
            match event {
                SeatEvent::Enable => {
                    info!("libseat: session enabled");
                    state.active = true;
                    let _ = state.event_tx.send(SeatChange::Enable);
                }
                SeatEvent::Disable => {
                    info!("libseat: session disabled");
                    state.active = false;
                    // Must call disable() to acknowledge
                    if let Err(e) = seat_ref.disable() {
                        warn!("libseat: failed to disable seat: {}", e);
                    }
                    let _ = state.event_tx.send(SeatChange::Disable);
                }
            }
        })
        .context("Failed to open libseat session")?;

        info!("libseat: opened seat '{}'", seat.name());

        // Pick up the initial enable event if it is already queued
        if let Err(e) = seat.dispatch(0) {
            debug!("libseat: initial dispatch failed: {}", e);
        }
        let seat_fd = match seat.get_fd() {
            Ok(fd) => Some(fd.as_raw_fd()),
            Err(e) => {
                warn!("libseat: no pollable fd: {}", e);
                None
            }
        };

        Ok(Box::new(Self {
            seat: Some(seat),
            state,
            event_rx,
            seat_fd,
            devices: Vec::new(),
        }))
    }
}

impl Backend for SeatBackend {
    fn name(&self) -> &'static str {
        "seatd"
    }

    fn destroy(&mut self) {
        let Some(mut seat) = self.seat.take() else {
            return;
        };
        for dev in self.devices.drain(..) {
            if let Err(e) = seat.close_device(dev.device) {
                warn!("libseat: failed to close device fd={}: {}", dev.fd, e);
            }
        }
        self.seat_fd = None;
        info!("libseat: closing session");
        drop(seat);
    }

    fn open(&mut self, path: &Path) -> io::Result<OwnedFd> {
        let seat = self
            .seat
            .as_mut()
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ENODEV))?;

        let device = seat
            .open_device(&path)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("libseat: {}", e)))?;

        // libseat keeps its own fd; hand out a dup so ownership is clear
        let dup_fd = nix::unistd::dup(device.as_fd().as_raw_fd())?;
        let owned_fd = unsafe { OwnedFd::from_raw_fd(dup_fd) };

        debug!("libseat: opened device {} (fd={})", path.display(), dup_fd);
        self.devices.push(SeatDevice {
            fd: dup_fd,
            device,
        });
        Ok(owned_fd)
    }

    fn close(&mut self, fd: OwnedFd) {
        let raw = fd.as_raw_fd();
        drop(fd);

        let Some(idx) = self.devices.iter().position(|d| d.fd == raw) else {
            warn!("libseat: close of unknown fd {}", raw);
            return;
        };
        let dev = self.devices.remove(idx);
        if let Some(seat) = self.seat.as_mut() {
            if let Err(e) = seat.close_device(dev.device) {
                warn!("libseat: failed to close device fd={}: {}", raw, e);
            }
        }
        trace!("libseat: closed device fd={}", raw);
    }

    fn change_vt(&mut self, vt: u32) -> bool {
        let Some(seat) = self.seat.as_mut() else {
            return false;
        };
        match seat.switch_session(vt as i32) {
            Ok(()) => true,
            Err(e) => {
                warn!("libseat: failed to switch to session {}: {}", vt, e);
                false
            }
        }
    }

    fn is_active(&self) -> bool {
        self.seat.is_some() && self.state.borrow().active
    }

    fn event_fd(&self) -> Option<RawFd> {
        self.seat_fd
    }

    fn dispatch(&mut self) -> Option<bool> {
        let seat = self.seat.as_mut()?;
        if let Err(e) = seat.dispatch(0) {
            warn!("libseat: failed to dispatch seat events: {}", e);
        }

        let mut last = None;
        while let Ok(change) = self.event_rx.try_recv() {
            last = Some(change);
        }
        last.map(|_| self.state.borrow().active)
    }
}

impl Drop for SeatBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}
