//! Primary GPU discovery
//!
//! Walks drm card nodes (`card0`, `card1`, ... not render or control nodes)
//! and picks the one the firmware marked `boot_vga`. Without a boot VGA
//! card the first KMS-capable card wins. Every fd opened while probing is
//! closed again unless it is the one returned.

use std::os::fd::{BorrowedFd, RawFd};
use std::path::Path;

use log::{debug, error, info};

use crate::drm::kms;
use crate::error::{Result, SessionError};
use crate::session::{Session, HOTPLUG_SUBSYSTEM};

/// Primary nodes only
pub const CARD_SYSNAME: &str = "card[0-9]*";

/// Find the primary GPU, probing KMS resources through the drm crate
///
/// Returns the tracked fd of the selected card (closed with
/// `Session::close_file` like any other), `Ok(None)` if no card qualifies.
pub fn find_primary_gpu(session: &mut Session) -> Result<Option<RawFd>> {
    find_primary_gpu_with(session, kms::is_kms)
}

/// [`find_primary_gpu`] with a custom KMS capability probe
pub fn find_primary_gpu_with<P>(session: &mut Session, mut is_kms: P) -> Result<Option<RawFd>>
where
    P: FnMut(BorrowedFd<'_>) -> bool,
{
    let syspaths = {
        let Some(hw) = session.subsystem() else {
            error!("Failed to create udev enumeration: session destroyed");
            return Err(SessionError::EnumerationFailed(std::io::Error::from_raw_os_error(
                libc::ENODEV,
            )));
        };
        hw.enumerate(HOTPLUG_SUBSYSTEM, CARD_SYSNAME).map_err(|e| {
            error!("Failed to create udev enumeration: {}", e);
            SessionError::EnumerationFailed(e)
        })?
    };

    let mut fd = None;

    for syspath in syspaths {
        let node = match session.subsystem().map(|hw| hw.resolve(&syspath)) {
            Some(Ok(node)) => node,
            Some(Err(e)) => {
                debug!("Skipping {}: {}", syspath.display(), e);
                continue;
            }
            None => break,
        };

        // We already have a valid GPU
        if !node.boot_vga && fd.is_some() {
            continue;
        }

        let Some(devnode) = node.devnode.as_deref() else {
            continue;
        };
        if !try_accept(session, devnode, &mut fd, &mut is_kms) {
            continue;
        }
        info!(
            "Found KMS device {} ({}){}",
            node.sysname,
            devnode.display(),
            if node.boot_vga { " [boot_vga]" } else { "" }
        );

        if node.boot_vga {
            break;
        }
    }

    if fd.is_none() {
        info!("No KMS-capable GPU found");
    }
    Ok(fd)
}

/// Open `path` and keep it in `accepted` if it is a KMS device.
///
/// A previously accepted fd is closed when replaced; a rejected one is
/// closed before returning.
fn try_accept<P>(
    session: &mut Session,
    path: &Path,
    accepted: &mut Option<RawFd>,
    is_kms: &mut P,
) -> bool
where
    P: FnMut(BorrowedFd<'_>) -> bool,
{
    let fd = match session.open_file(path) {
        Ok(fd) => fd,
        Err(e) => {
            debug!("Cannot probe {}: {}", path.display(), e);
            return false;
        }
    };

    let kms_ok = session.borrow_fd(fd).map(&mut *is_kms).unwrap_or(false);
    if !kms_ok {
        debug!("{} is not a KMS device", path.display());
        session.close_file(fd);
        return false;
    }

    if let Some(previous) = accepted.replace(fd) {
        session.close_file(previous);
    }
    true
}
