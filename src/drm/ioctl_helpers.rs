//! Thin wrappers for the VT and DRM master ioctls used by the direct backend
//!
//! Error messages carry the ioctl name and fd so setup failures can be
//! diagnosed from the log alone.

use anyhow::{anyhow, Result};
use std::os::unix::io::RawFd;

// DRM: include/uapi/drm/drm.h
// _IO('d', 0x1e) = SET_MASTER, _IO('d', 0x1f) = DROP_MASTER
const DRM_IOCTL_BASE: u64 = 0x64;
pub const DRM_IOCTL_SET_MASTER: libc::c_ulong =
    nix::request_code_none!(DRM_IOCTL_BASE, 0x1e) as libc::c_ulong;
pub const DRM_IOCTL_DROP_MASTER: libc::c_ulong =
    nix::request_code_none!(DRM_IOCTL_BASE, 0x1f) as libc::c_ulong;

// linux/vt.h
pub const VT_GETSTATE: libc::c_ulong = 0x5603;
pub const VT_SETMODE: libc::c_ulong = 0x5602;
pub const VT_RELDISP: libc::c_ulong = 0x5605;
pub const VT_ACTIVATE: libc::c_ulong = 0x5606;

pub const VT_AUTO: libc::c_char = 0;
pub const VT_PROCESS: libc::c_char = 1;
pub const VT_ACKACQ: libc::c_int = 2;

// linux/kd.h
pub const KDSETMODE: libc::c_ulong = 0x4B3A;
pub const KDGETMODE: libc::c_ulong = 0x4B3B;
pub const KD_TEXT: libc::c_int = 0x00;
pub const KD_GRAPHICS: libc::c_int = 0x01;

/// vt_mode structure for VT_SETMODE
#[repr(C)]
pub struct VtMode {
    pub mode: libc::c_char,
    pub waitv: libc::c_char,
    pub relsig: libc::c_short,
    pub acqsig: libc::c_short,
    pub frsig: libc::c_short,
}

impl VtMode {
    pub fn auto() -> Self {
        Self {
            mode: VT_AUTO,
            waitv: 0,
            relsig: 0,
            acqsig: 0,
            frsig: 0,
        }
    }

    pub fn process(relsig: libc::c_int, acqsig: libc::c_int) -> Self {
        Self {
            mode: VT_PROCESS,
            waitv: 0,
            relsig: relsig as libc::c_short,
            acqsig: acqsig as libc::c_short,
            frsig: 0,
        }
    }
}

/// vt_stat structure for VT_GETSTATE
#[repr(C)]
#[derive(Default)]
pub struct VtStat {
    pub v_active: libc::c_ushort,
    pub v_signal: libc::c_ushort,
    pub v_state: libc::c_ushort,
}

fn check(ret: libc::c_int, fd: RawFd, cmd_name: &str) -> Result<()> {
    if ret < 0 {
        Err(anyhow!(
            "{} failed on fd {}: {}",
            cmd_name,
            fd,
            std::io::Error::last_os_error()
        ))
    } else {
        Ok(())
    }
}

/// Execute an ioctl command that takes no argument.
pub fn ioctl_no_arg(fd: RawFd, cmd: libc::c_ulong, cmd_name: &str) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd) };
    check(ret, fd, cmd_name)
}

/// Execute an ioctl command with an integer argument.
pub fn ioctl_with_int_arg(
    fd: RawFd,
    cmd: libc::c_ulong,
    arg: libc::c_int,
    cmd_name: &str,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg) };
    check(ret, fd, cmd_name)
}

/// Execute an ioctl command with a const argument.
///
/// The argument type must match what the ioctl expects.
pub fn ioctl_with_ref_arg<T>(fd: RawFd, cmd: libc::c_ulong, arg: &T, cmd_name: &str) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg as *const T) };
    check(ret, fd, cmd_name)
}

/// Execute an ioctl command with a mutable (output) argument.
///
/// The argument type must match what the ioctl expects.
pub fn ioctl_with_mut_arg<T>(
    fd: RawFd,
    cmd: libc::c_ulong,
    arg: &mut T,
    cmd_name: &str,
) -> Result<()> {
    let ret = unsafe { libc::ioctl(fd, cmd, arg as *mut T) };
    check(ret, fd, cmd_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    #[test]
    fn test_master_request_codes() {
        assert_eq!(DRM_IOCTL_SET_MASTER, 0x641e);
        assert_eq!(DRM_IOCTL_DROP_MASTER, 0x641f);
    }

    #[test]
    fn test_error_names_ioctl() {
        let file = File::open("/dev/null").unwrap();
        let err = ioctl_no_arg(file.as_raw_fd(), DRM_IOCTL_SET_MASTER, "SET_MASTER")
            .expect_err("/dev/null is not a drm node");
        assert!(err.to_string().starts_with("SET_MASTER failed on fd"));
    }
}
