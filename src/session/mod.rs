//! Session management
//!
//! A [`Session`] owns the privileged-access backend, the registry of device
//! fds it handed out, and a udev monitor on the drm subsystem. Hotplug
//! "change" records are routed to the device whose kernel device number
//! matches, so the compositor can rescan connectors without restarting.
//!
//! Everything runs on the thread that drives the host event loop. The loop
//! reports readiness as [`SourceId`]s and the host forwards them to
//! [`Session::dispatch`].

pub mod backend;
pub mod direct;
pub mod registry;
#[cfg(feature = "seatd")]
pub mod seatd;
pub mod signal;
#[cfg(test)]
pub(crate) mod testing;

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::path::Path;

use log::{debug, error, info, warn};

use crate::drm::subsystem::{ChangeRecord, HotplugSource, Subsystem, UdevSubsystem};
use crate::error::{Result, SessionError};
use crate::event_loop::{EventSource, LoopHandle, SourceId};

pub use backend::{Backend, BackendChoice, BackendProbe};
pub use registry::{DeviceChange, DeviceRegistry};
pub use signal::{ListenerId, Signal};

/// Subsystem watched for hotplug events
pub const HOTPLUG_SUBSYSTEM: &str = "drm";

/// Privileged hardware access for one compositor process
///
/// Field order is teardown order for the drop glue: event sources go
/// before the monitor, the monitor before the udev context.
pub struct Session {
    active: bool,
    active_signal: Signal<bool>,
    devices: DeviceRegistry,
    backend_source: Option<EventSource>,
    monitor_source: Option<EventSource>,
    monitor: Option<Box<dyn HotplugSource>>,
    hw: Option<Box<dyn Subsystem>>,
    /// None once destroyed
    backend: Option<Box<dyn Backend>>,
    event_loop: LoopHandle,
}

impl Session {
    /// Create a session with the default backend priority list and udev
    pub fn create(event_loop: &LoopHandle) -> Result<Self> {
        Self::create_with_backend(event_loop, BackendChoice::Auto)
    }

    /// Create a session restricted to the backends allowed by `choice`
    pub fn create_with_backend(event_loop: &LoopHandle, choice: BackendChoice) -> Result<Self> {
        Self::create_with(event_loop, &backend::probes_for(choice), || {
            Ok(Box::new(UdevSubsystem::new()?) as Box<dyn Subsystem>)
        })
    }

    /// Create a session from an explicit probe list and subsystem constructor
    ///
    /// Backends are tried in order; the first that comes up is kept for the
    /// lifetime of the session. Any failure after that point releases what
    /// was already acquired and destroys the backend again.
    pub fn create_with<F>(
        event_loop: &LoopHandle,
        probes: &[BackendProbe],
        open_subsystem: F,
    ) -> Result<Self>
    where
        F: FnOnce() -> io::Result<Box<dyn Subsystem>>,
    {
        let backend = backend::select(probes, event_loop)?;
        // Usually true; false when started on a VT that is not in front
        let active = backend.is_active();

        let mut session = Self {
            active,
            active_signal: Signal::new(),
            devices: DeviceRegistry::new(),
            backend_source: None,
            monitor_source: None,
            monitor: None,
            hw: None,
            backend: Some(backend),
            event_loop: event_loop.clone(),
        };

        if let Err(e) = session.init_hotplug(open_subsystem) {
            session.destroy();
            return Err(e);
        }
        Ok(session)
    }

    /// Acquire udev context, monitor and loop registrations.
    ///
    /// Locals drop in reverse order on early return, which is the rollback.
    fn init_hotplug<F>(&mut self, open_subsystem: F) -> Result<()>
    where
        F: FnOnce() -> io::Result<Box<dyn Subsystem>>,
    {
        let hw = open_subsystem().map_err(|e| {
            error!("Failed to create udev context: {}", e);
            SessionError::ContextInitFailed(e)
        })?;

        let monitor = hw.monitor(HOTPLUG_SUBSYSTEM).map_err(|e| {
            error!("Failed to create udev monitor: {}", e);
            SessionError::MonitorInitFailed(e)
        })?;

        let monitor_source = EventSource::register(&self.event_loop, monitor.fd()).map_err(|e| {
            error!("Failed to create udev event source: {}", e);
            SessionError::EventSourceFailed(e)
        })?;

        let backend_source = match self.backend.as_ref().and_then(|b| b.event_fd()) {
            Some(fd) => Some(EventSource::register(&self.event_loop, fd).map_err(|e| {
                error!("Failed to create session event source: {}", e);
                SessionError::EventSourceFailed(e)
            })?),
            None => None,
        };

        self.hw = Some(hw);
        self.monitor = Some(monitor);
        self.monitor_source = Some(monitor_source);
        self.backend_source = backend_source;
        Ok(())
    }

    /// Tear the session down. Safe to call more than once.
    ///
    /// Order: loop registrations, monitor, udev context, leftover device
    /// fds, then the backend's own teardown.
    pub fn destroy(&mut self) {
        let Some(mut backend) = self.backend.take() else {
            return;
        };

        self.backend_source = None;
        self.monitor_source = None;
        self.monitor = None;
        self.hw = None;

        for device in self.devices.drain() {
            warn!("Closing fd {} still open at session teardown", device.raw_fd());
            backend.close(device.into_fd());
        }

        backend.destroy();
        info!("Session destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.backend.is_none()
    }

    /// Whether the process currently owns the display hardware
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    /// Open a device node through the backend and start tracking it
    ///
    /// The device number is taken from `fstat` on the returned descriptor,
    /// never from the path.
    ///
    /// # Errors
    /// - [`SessionError::BackendOpenFailed`] if the backend refuses the node
    ///   (or the session is destroyed).
    /// - [`SessionError::StatFailed`] if `fstat` fails on the new descriptor.
    ///   The fd is handed back to the backend's close first, so nothing is
    ///   left open and the registry is unchanged.
    pub fn open_file<P: AsRef<Path>>(&mut self, path: P) -> Result<RawFd> {
        self.open_file_with(path.as_ref(), |fd| {
            nix::sys::stat::fstat(fd).map(|st| st.st_rdev)
        })
    }

    /// [`open_file`](Self::open_file) with the device-number lookup supplied
    fn open_file_with<S>(&mut self, path: &Path, stat: S) -> Result<RawFd>
    where
        S: FnOnce(RawFd) -> nix::Result<libc::dev_t>,
    {
        let Some(backend) = self.backend.as_mut() else {
            return Err(SessionError::BackendOpenFailed {
                path: path.display().to_string(),
                source: io::Error::from_raw_os_error(libc::ENODEV),
            });
        };

        let fd = backend.open(path).map_err(|e| {
            warn!("Failed to open {}: {}", path.display(), e);
            SessionError::BackendOpenFailed {
                path: path.display().to_string(),
                source: e,
            }
        })?;

        let raw = fd.as_raw_fd();
        let dev = match stat(raw) {
            Ok(dev) => dev,
            Err(e) => {
                error!("Stat failed on {} (fd {}): {}", path.display(), raw, e);
                backend.close(fd);
                return Err(SessionError::StatFailed {
                    fd: raw,
                    source: e.into(),
                });
            }
        };

        debug!(
            "Opened {} as fd {} ({}:{})",
            path.display(),
            raw,
            libc::major(dev),
            libc::minor(dev)
        );
        Ok(self.devices.insert(fd, dev))
    }

    /// Close an fd returned by [`open_file`](Self::open_file)
    ///
    /// # Panics
    /// If `fd` is not tracked by this session. Closing a foreign fd means the
    /// caller's bookkeeping is broken.
    pub fn close_file(&mut self, fd: RawFd) {
        let Some(device) = self.devices.remove(fd) else {
            untracked_fd(fd);
        };
        match self.backend.as_mut() {
            Some(backend) => backend.close(device.into_fd()),
            None => drop(device),
        }
    }

    /// Attach a listener to hotplug changes of the device behind `fd`
    ///
    /// # Panics
    /// If `fd` is not tracked by this session.
    pub fn signal_add<F>(&mut self, fd: RawFd, listener: F) -> ListenerId
    where
        F: FnMut(&DeviceChange) + 'static,
    {
        match self.devices.add_listener(fd, listener) {
            Some(id) => id,
            None => untracked_fd(fd),
        }
    }

    /// Detach a listener added with [`signal_add`](Self::signal_add)
    pub fn signal_remove(&mut self, fd: RawFd, id: ListenerId) -> bool {
        self.devices.remove_listener(fd, id)
    }

    /// Listen for active/inactive transitions (VT switch away and back)
    pub fn active_signal_add<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&bool) + 'static,
    {
        self.active_signal.add(listener)
    }

    pub fn active_signal_remove(&mut self, id: ListenerId) -> bool {
        self.active_signal.remove(id)
    }

    /// Ask the backend to switch to virtual terminal `vt`
    pub fn change_vt(&mut self, vt: u32) -> bool {
        match self.backend.as_mut() {
            Some(backend) => backend.change_vt(vt),
            None => false,
        }
    }

    /// Borrow a tracked fd (for ioctls like the KMS probe)
    pub fn borrow_fd(&self, fd: RawFd) -> Option<BorrowedFd<'_>> {
        self.devices.get(fd).map(|d| d.as_fd())
    }

    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    pub fn subsystem(&self) -> Option<&dyn Subsystem> {
        self.hw.as_deref()
    }

    /// Loop token of the hotplug monitor
    pub fn hotplug_source(&self) -> Option<SourceId> {
        self.monitor_source.as_ref().map(|s| s.id())
    }

    /// Loop token of the backend's notification fd
    pub fn backend_source(&self) -> Option<SourceId> {
        self.backend_source.as_ref().map(|s| s.id())
    }

    /// Handle a readable source reported by the host loop
    ///
    /// Returns true if the source belongs to this session (and stays
    /// registered), false otherwise.
    pub fn dispatch(&mut self, source: SourceId) -> bool {
        if self.hotplug_source() == Some(source) {
            self.dispatch_hotplug();
            true
        } else if self.backend_source() == Some(source) {
            self.dispatch_backend();
            true
        } else {
            false
        }
    }

    /// Receive one pending record from the monitor and route it
    pub fn dispatch_hotplug(&mut self) {
        let Some(record) = self.monitor.as_mut().and_then(|m| m.receive()) else {
            return;
        };
        self.handle_change_record(&record);
    }

    /// Route a change record to the device with the matching number.
    ///
    /// Only "change" actions are handled; add/remove of drm nodes is
    /// ignored. Returns the fd whose listeners ran.
    pub fn handle_change_record(&mut self, record: &ChangeRecord) -> Option<RawFd> {
        if !record.is_change() {
            return None;
        }
        let dev = record.devnum?;
        let fd = self.devices.notify_change(dev);
        if let Some(fd) = fd {
            debug!("drm change on {} routed to fd {}", record.sysname, fd);
        }
        fd
    }

    fn dispatch_backend(&mut self) {
        let Some(active) = self.backend.as_mut().and_then(|b| b.dispatch()) else {
            return;
        };
        self.set_active(active);
    }

    fn set_active(&mut self, active: bool) {
        if self.active == active {
            return;
        }
        self.active = active;
        info!("Session {}", if active { "activated" } else { "deactivated" });
        self.active_signal.emit(&active);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("backend", &self.backend_name())
            .field("active", &self.active)
            .field("devices", &self.devices.len())
            .field("hotplug", &self.hotplug_source())
            .finish()
    }
}

fn untracked_fd(fd: RawFd) -> ! {
    error!("Tried to use fd {} not opened by session", fd);
    panic!("fd {} is not tracked by the session", fd);
}
