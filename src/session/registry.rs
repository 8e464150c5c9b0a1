//! Open device bookkeeping
//!
//! Every fd the session hands out has exactly one entry here. Entries are
//! keyed by fd for close/listener lookups and by kernel device number for
//! hotplug routing.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use super::signal::{ListenerId, Signal};

/// Payload of a per-device change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceChange {
    /// Session fd of the device that changed
    pub fd: RawFd,
    /// Kernel device number reported by the change record
    pub dev: libc::dev_t,
}

/// One open privileged fd
pub struct Device {
    fd: OwnedFd,
    dev: libc::dev_t,
    signal: Signal<DeviceChange>,
}

impl Device {
    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Device number captured from `fstat` at open time
    pub fn dev(&self) -> libc::dev_t {
        self.dev
    }

    pub fn into_fd(self) -> OwnedFd {
        self.fd
    }
}

impl AsFd for Device {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("fd", &self.raw_fd())
            .field("major", &libc::major(self.dev))
            .field("minor", &libc::minor(self.dev))
            .field("listeners", &self.signal.len())
            .finish()
    }
}

/// Ordered set of open devices
///
/// Lookups scan newest first, so if two entries ever share a device number the
/// most recently opened one receives the change notification.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Device>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `fd`. Returns the raw fd now owned by the registry.
    pub fn insert(&mut self, fd: OwnedFd, dev: libc::dev_t) -> RawFd {
        let raw = fd.as_raw_fd();
        self.devices.push(Device {
            fd,
            dev,
            signal: Signal::new(),
        });
        raw
    }

    pub fn get(&self, fd: RawFd) -> Option<&Device> {
        self.devices.iter().rev().find(|d| d.raw_fd() == fd)
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.get(fd).is_some()
    }

    /// Stop tracking `fd` and hand its entry back
    pub fn remove(&mut self, fd: RawFd) -> Option<Device> {
        let idx = self.devices.iter().rposition(|d| d.raw_fd() == fd)?;
        Some(self.devices.remove(idx))
    }

    pub fn add_listener<F>(&mut self, fd: RawFd, listener: F) -> Option<ListenerId>
    where
        F: FnMut(&DeviceChange) + 'static,
    {
        let device = self.devices.iter_mut().rev().find(|d| d.raw_fd() == fd)?;
        Some(device.signal.add(listener))
    }

    pub fn remove_listener(&mut self, fd: RawFd, id: ListenerId) -> bool {
        self.devices
            .iter_mut()
            .rev()
            .find(|d| d.raw_fd() == fd)
            .map(|d| d.signal.remove(id))
            .unwrap_or(false)
    }

    /// Fire the change signal of the first device matching `dev`.
    ///
    /// Returns the fd whose listeners ran, if any.
    pub fn notify_change(&mut self, dev: libc::dev_t) -> Option<RawFd> {
        let device = self.devices.iter_mut().rev().find(|d| d.dev == dev)?;
        let change = DeviceChange {
            fd: device.raw_fd(),
            dev,
        };
        device.signal.emit(&change);
        Some(change.fd)
    }

    /// Remove every entry, newest first
    pub fn drain(&mut self) -> impl Iterator<Item = Device> + '_ {
        self.devices.drain(..).rev()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.devices.iter().map(|d| d.raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::rc::Rc;

    fn null_fd() -> OwnedFd {
        OwnedFd::from(File::open("/dev/null").expect("open /dev/null"))
    }

    #[test]
    fn test_insert_and_remove() {
        let mut registry = DeviceRegistry::new();
        let a = registry.insert(null_fd(), 5);
        let b = registry.insert(null_fd(), 7);
        assert_eq!(registry.len(), 2);

        let removed = registry.remove(a).expect("a tracked");
        assert_eq!(removed.dev(), 5);
        assert_eq!(registry.len(), 1);
        assert!(!registry.contains(a));
        assert!(registry.contains(b));
        assert!(registry.remove(a).is_none());
    }

    #[test]
    fn test_change_routes_to_matching_device_only() {
        let mut registry = DeviceRegistry::new();
        let a = registry.insert(null_fd(), 5);
        let b = registry.insert(null_fd(), 7);

        let hits = Rc::new(RefCell::new(Vec::new()));
        let h = hits.clone();
        registry.add_listener(a, move |c| h.borrow_mut().push(("a", c.dev)));
        let h = hits.clone();
        registry.add_listener(b, move |c| h.borrow_mut().push(("b", c.dev)));

        assert_eq!(registry.notify_change(7), Some(b));
        assert_eq!(*hits.borrow(), vec![("b", 7)]);

        assert_eq!(registry.notify_change(9), None);
        assert_eq!(hits.borrow().len(), 1);
    }

    #[test]
    fn test_duplicate_dev_newest_wins() {
        let mut registry = DeviceRegistry::new();
        let old = registry.insert(null_fd(), 3);
        let new = registry.insert(null_fd(), 3);

        let hits = Rc::new(RefCell::new(Vec::new()));
        let h = hits.clone();
        registry.add_listener(old, move |c| h.borrow_mut().push(c.fd));
        let h = hits.clone();
        registry.add_listener(new, move |c| h.borrow_mut().push(c.fd));

        registry.notify_change(3);
        assert_eq!(*hits.borrow(), vec![new]);
    }

    #[test]
    fn test_listener_on_unknown_fd() {
        let mut registry = DeviceRegistry::new();
        assert!(registry.add_listener(12345, |_| {}).is_none());
    }
}
