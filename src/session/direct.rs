//! Direct VT session backend
//!
//! Takes over the VT with VT_SETMODE/VT_PROCESS and opens device nodes
//! itself, so it needs root. The kernel sends SIGUSR2 when the user
//! switches away and SIGUSR1 when they come back; those arrive on a
//! signalfd that the session polls through `event_fd`.
//!
//! DRM nodes opened here get DRM master while the VT is ours and lose it
//! on release. Input nodes are revoked on close.

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info, warn};
use nix::sys::signal::{SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};

use super::backend::Backend;
use crate::drm::ioctl_helpers::{self as ioctl, VtMode, VtStat};
use crate::event_loop::LoopHandle;

const DRM_MAJOR: u32 = 226;
const INPUT_MAJOR: u32 = 13;

// _IOW('E', 0x91, int)
const EVIOCREVOKE: libc::c_ulong =
    nix::request_code_write!(b'E', 0x91, std::mem::size_of::<libc::c_int>()) as libc::c_ulong;

/// Open node tracked for master handoff / revocation
struct OpenNode {
    fd: RawFd,
    major: u32,
}

/// Root-only backend driving the VT directly
pub struct DirectBackend {
    /// None once destroyed
    tty: Option<OwnedFd>,
    vt: u16,
    signal_fd: SignalFd,
    old_sigmask: SigSet,
    original_kd_mode: libc::c_int,
    nodes: Vec<OpenNode>,
    active: bool,
}

impl DirectBackend {
    /// Probe: requires root and a controlling VT
    pub fn create(_event_loop: &LoopHandle) -> Result<Box<dyn Backend>> {
        if unsafe { libc::geteuid() } != 0 {
            bail!("direct session backend requires root");
        }

        let vt = get_target_vt()
            .ok_or_else(|| anyhow!("Cannot determine VT from stdin - not running on a VT?"))?;
        info!("Target VT: {}", vt);

        let tty_path = format!("/dev/tty{}", vt);
        let tty: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_NOCTTY)
            .open(&tty_path)
            .with_context(|| format!("Cannot open {}", tty_path))?
            .into();
        let tty_fd = tty.as_raw_fd();

        let mut original_kd_mode: libc::c_int = ioctl::KD_TEXT;
        if let Err(e) = ioctl::ioctl_with_mut_arg(
            tty_fd,
            ioctl::KDGETMODE,
            &mut original_kd_mode,
            "KDGETMODE",
        ) {
            debug!("{} (assuming KD_TEXT)", e);
        }

        // Block SIGUSR1/SIGUSR2 so they are only seen through the signalfd
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGUSR2);
        let old_sigmask = mask
            .thread_swap_mask(SigmaskHow::SIG_BLOCK)
            .context("Failed to block VT signals")?;

        let signal_fd = match SignalFd::with_flags(
            &mask,
            SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC,
        ) {
            Ok(fd) => fd,
            Err(e) => {
                old_sigmask.thread_set_mask().ok();
                return Err(e).context("Failed to create signalfd");
            }
        };

        let mode = VtMode::process(Signal::SIGUSR2 as libc::c_int, Signal::SIGUSR1 as libc::c_int);
        if let Err(e) = ioctl::ioctl_with_ref_arg(tty_fd, ioctl::VT_SETMODE, &mode, "VT_SETMODE") {
            old_sigmask.thread_set_mask().ok();
            return Err(e);
        }

        if let Err(e) =
            ioctl::ioctl_with_int_arg(tty_fd, ioctl::KDSETMODE, ioctl::KD_GRAPHICS, "KDSETMODE")
        {
            warn!("{} (continuing anyway)", e);
        }

        info!(
            "VT{} process-controlled mode enabled (SIGUSR1=acquire, SIGUSR2=release)",
            vt
        );

        // VT_GETSTATE failing is not fatal; assume we are in front
        let active = active_vt(tty_fd).map(|a| a == vt).unwrap_or(true);
        if !active {
            info!("VT{} is not the active VT yet", vt);
        }

        Ok(Box::new(Self {
            tty: Some(tty),
            vt,
            signal_fd,
            old_sigmask,
            original_kd_mode,
            nodes: Vec::new(),
            active,
        }))
    }

    fn tty_fd(&self) -> Option<RawFd> {
        self.tty.as_ref().map(|t| t.as_raw_fd())
    }

    fn release(&mut self) {
        for node in self.nodes.iter().filter(|n| n.major == DRM_MAJOR) {
            if let Err(e) = ioctl::ioctl_no_arg(node.fd, ioctl::DRM_IOCTL_DROP_MASTER, "DROP_MASTER")
            {
                warn!("{}", e);
            }
        }
        if let Some(tty_fd) = self.tty_fd() {
            if let Err(e) = ioctl::ioctl_with_int_arg(tty_fd, ioctl::VT_RELDISP, 1, "VT_RELDISP") {
                warn!("{}", e);
            }
        }
        self.active = false;
        info!("VT{} released", self.vt);
    }

    fn acquire(&mut self) {
        if let Some(tty_fd) = self.tty_fd() {
            if let Err(e) =
                ioctl::ioctl_with_int_arg(tty_fd, ioctl::VT_RELDISP, ioctl::VT_ACKACQ, "VT_RELDISP")
            {
                warn!("{}", e);
            }
        }
        for node in self.nodes.iter().filter(|n| n.major == DRM_MAJOR) {
            if let Err(e) = ioctl::ioctl_no_arg(node.fd, ioctl::DRM_IOCTL_SET_MASTER, "SET_MASTER") {
                warn!("{}", e);
            }
        }
        self.active = true;
        info!("VT{} acquired", self.vt);
    }
}

impl Backend for DirectBackend {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn destroy(&mut self) {
        let Some(tty) = self.tty.take() else {
            return;
        };
        let tty_fd = tty.as_raw_fd();

        if let Err(e) =
            ioctl::ioctl_with_int_arg(tty_fd, ioctl::KDSETMODE, self.original_kd_mode, "KDSETMODE")
        {
            warn!("Failed to restore KD mode: {}", e);
        }
        if let Err(e) =
            ioctl::ioctl_with_ref_arg(tty_fd, ioctl::VT_SETMODE, &VtMode::auto(), "VT_SETMODE")
        {
            warn!("Failed to reset VT to VT_AUTO: {}", e);
        }
        if let Err(e) = self.old_sigmask.thread_set_mask() {
            warn!("Failed to restore signal mask: {}", e);
        }
        drop(tty);
        info!("Direct session backend cleaned up");
    }

    fn open(&mut self, path: &Path) -> io::Result<OwnedFd> {
        let fd: OwnedFd = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?
            .into();

        let st = nix::sys::stat::fstat(fd.as_raw_fd())?;
        let major = libc::major(st.st_rdev) as u32;

        if major == DRM_MAJOR && self.active {
            if let Err(e) = ioctl::ioctl_no_arg(fd.as_raw_fd(), ioctl::DRM_IOCTL_SET_MASTER, "SET_MASTER")
            {
                warn!("{}", e);
            }
        }

        debug!("Opened {} (fd={}, major={})", path.display(), fd.as_raw_fd(), major);
        self.nodes.push(OpenNode {
            fd: fd.as_raw_fd(),
            major,
        });
        Ok(fd)
    }

    fn close(&mut self, fd: OwnedFd) {
        let raw = fd.as_raw_fd();
        if let Some(idx) = self.nodes.iter().position(|n| n.fd == raw) {
            let node = self.nodes.remove(idx);
            let result = match node.major {
                DRM_MAJOR => ioctl::ioctl_no_arg(raw, ioctl::DRM_IOCTL_DROP_MASTER, "DROP_MASTER"),
                INPUT_MAJOR => ioctl::ioctl_with_int_arg(raw, EVIOCREVOKE, 0, "EVIOCREVOKE"),
                _ => Ok(()),
            };
            if let Err(e) = result {
                debug!("{}", e);
            }
        }
        drop(fd);
    }

    fn change_vt(&mut self, vt: u32) -> bool {
        let Some(tty_fd) = self.tty_fd() else {
            return false;
        };
        info!("Requesting switch to VT{}", vt);
        match ioctl::ioctl_with_int_arg(tty_fd, ioctl::VT_ACTIVATE, vt as libc::c_int, "VT_ACTIVATE")
        {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn event_fd(&self) -> Option<RawFd> {
        Some(self.signal_fd.as_raw_fd())
    }

    fn dispatch(&mut self) -> Option<bool> {
        let was_active = self.active;
        loop {
            match self.signal_fd.read_signal() {
                Ok(Some(siginfo)) => {
                    let signo = siginfo.ssi_signo as i32;
                    if signo == Signal::SIGUSR2 as i32 {
                        debug!("SIGUSR2 received: VT release requested");
                        self.release();
                    } else if signo == Signal::SIGUSR1 as i32 {
                        debug!("SIGUSR1 received: VT acquire");
                        self.acquire();
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("signalfd read error: {}", e);
                    break;
                }
            }
        }
        (self.active != was_active).then_some(self.active)
    }
}

impl Drop for DirectBackend {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// VT number of the terminal on stdin
///
/// Checks the tty name first, then falls back to the device number of
/// stdin (tty1-tty63 are major 4, minor 1-63).
pub fn get_target_vt() -> Option<u16> {
    let tty_path = unsafe {
        let ptr = libc::ttyname(0);
        if ptr.is_null() {
            None
        } else {
            Some(std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    };

    if let Some(vt) = tty_path.as_deref().and_then(parse_vt_path) {
        return Some(vt);
    }

    let st = nix::sys::stat::fstat(0).ok()?;
    let major = libc::major(st.st_rdev);
    let minor = libc::minor(st.st_rdev);
    debug!("stdin device: major={}, minor={}", major, minor);

    if major == 4 && (1..=63).contains(&minor) {
        Some(minor as u16)
    } else {
        None
    }
}

fn parse_vt_path(path: &str) -> Option<u16> {
    let vt = path.strip_prefix("/dev/tty")?.parse::<u16>().ok()?;
    (1..=63).contains(&vt).then_some(vt)
}

/// Currently active VT according to the kernel
fn active_vt(tty_fd: RawFd) -> Option<u16> {
    let mut stat = VtStat::default();
    ioctl::ioctl_with_mut_arg(tty_fd, ioctl::VT_GETSTATE, &mut stat, "VT_GETSTATE").ok()?;
    Some(stat.v_active)
}
