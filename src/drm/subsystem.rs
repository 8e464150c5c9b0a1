//! Hardware subsystem access
//!
//! The session only needs a small slice of udev: a netlink monitor for one
//! subsystem, enumeration by subsystem and sysname glob, and resolving a
//! syspath to the bits GPU discovery cares about. The traits below cover
//! exactly that; [`UdevSubsystem`] is the real implementation.

use std::io;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use log::debug;

use super::hotplug::UdevMonitor;

/// One record received from a hotplug monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    /// "add", "remove", "change", ... (None if the kernel sent no action)
    pub action: Option<String>,
    /// Kernel device number of the node, if it has one
    pub devnum: Option<libc::dev_t>,
    pub sysname: String,
}

impl ChangeRecord {
    pub fn is_change(&self) -> bool {
        self.action.as_deref() == Some("change")
    }
}

/// Enumerated drm card resolved to what discovery needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardNode {
    pub sysname: String,
    /// /dev node; None for devices without one
    pub devnode: Option<PathBuf>,
    /// PCI parent reports `boot_vga` == "1"
    pub boot_vga: bool,
}

/// Live subscription to device change events
pub trait HotplugSource {
    /// Pollable fd, readable while records are pending
    fn fd(&self) -> RawFd;

    /// Receive one pending record without blocking
    fn receive(&mut self) -> Option<ChangeRecord>;
}

/// Hardware subsystem context
pub trait Subsystem {
    /// Create and enable a monitor filtered to `subsystem` (any devtype)
    fn monitor(&self, subsystem: &str) -> io::Result<Box<dyn HotplugSource>>;

    /// Syspaths of devices in `subsystem` whose sysname matches `sysname` (glob)
    fn enumerate(&self, subsystem: &str, sysname: &str) -> io::Result<Vec<PathBuf>>;

    fn resolve(&self, syspath: &Path) -> io::Result<CardNode>;
}

/// libudev-backed subsystem context
pub struct UdevSubsystem {
    udev: udev::Udev,
}

impl UdevSubsystem {
    pub fn new() -> io::Result<Self> {
        let udev = udev::Udev::new()?;
        debug!("udev context created");
        Ok(Self { udev })
    }
}

impl Subsystem for UdevSubsystem {
    fn monitor(&self, subsystem: &str) -> io::Result<Box<dyn HotplugSource>> {
        Ok(Box::new(UdevMonitor::with_udev(self.udev.clone(), subsystem)?))
    }

    fn enumerate(&self, subsystem: &str, sysname: &str) -> io::Result<Vec<PathBuf>> {
        let mut enumerator = udev::Enumerator::with_udev(self.udev.clone())?;
        enumerator.match_subsystem(subsystem)?;
        enumerator.match_sysname(sysname)?;
        let paths = enumerator
            .scan_devices()?
            .map(|device| device.syspath().to_path_buf())
            .collect();
        Ok(paths)
    }

    fn resolve(&self, syspath: &Path) -> io::Result<CardNode> {
        let device = udev::Device::from_syspath_with_context(self.udev.clone(), syspath)?;

        // Missing PCI parent (platform GPUs) just means "not boot VGA"
        let boot_vga = match device.parent_with_subsystem("pci") {
            Ok(Some(pci)) => pci
                .attribute_value("boot_vga")
                .map(|v| v == "1")
                .unwrap_or(false),
            _ => false,
        };

        Ok(CardNode {
            sysname: device.sysname().to_string_lossy().into_owned(),
            devnode: device.devnode().map(Path::to_path_buf),
            boot_vga,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_change_action_counts() {
        let mut record = ChangeRecord {
            action: Some("change".to_string()),
            devnum: Some(libc::makedev(226, 0)),
            sysname: "card0".to_string(),
        };
        assert!(record.is_change());

        record.action = Some("add".to_string());
        assert!(!record.is_change());
        record.action = Some("changed".to_string());
        assert!(!record.is_change());
        record.action = None;
        assert!(!record.is_change());
    }

    // Needs a real udev database (not available in most CI containers)
    #[test]
    #[ignore]
    fn test_enumerate_cards() {
        let subsystem = UdevSubsystem::new().expect("udev context");
        let cards = subsystem.enumerate("drm", "card[0-9]*").expect("enumerate");
        for path in cards {
            let node = subsystem.resolve(&path).expect("resolve");
            assert!(node.sysname.starts_with("card"));
        }
    }
}
