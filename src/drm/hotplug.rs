//! DRM hotplug detection
//!
//! Monitors udev events on the drm subsystem (connector changes, GPU
//! resets). The fd is handed to the host event loop; each readable wakeup
//! pulls one record.

use log::{debug, info};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

use super::subsystem::{ChangeRecord, HotplugSource};

/// udev netlink monitor for one subsystem
pub struct UdevMonitor {
    socket: udev::MonitorSocket,
}

impl UdevMonitor {
    /// Create and enable a monitor on the given udev context
    pub fn with_udev(udev: udev::Udev, subsystem: &str) -> io::Result<Self> {
        let socket = udev::MonitorBuilder::with_udev(udev)?
            .match_subsystem(subsystem)?
            .listen()?;

        info!("{} hotplug monitor initialized", subsystem);
        Ok(Self { socket })
    }
}

impl HotplugSource for UdevMonitor {
    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    fn receive(&mut self) -> Option<ChangeRecord> {
        // MonitorSocket is non-blocking; take at most one event
        let event = self.socket.iter().next()?;

        let record = ChangeRecord {
            action: event.action().map(|a| a.to_string_lossy().into_owned()),
            devnum: event.devnum(),
            sysname: event.sysname().to_string_lossy().into_owned(),
        };
        debug!(
            "udev event for {} ({})",
            record.sysname,
            record.action.as_deref().unwrap_or("none")
        );
        Some(record)
    }
}
