//! kmsseat - hold a seat session and the primary GPU for a KMS compositor
//!
//! Opens a session (libseat or direct VT control), selects the primary GPU
//! and keeps it open, logging drm hotplug changes and VT transitions until
//! told to stop.

use std::cell::RefCell;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, Context, Result};
use log::{debug, info, trace, warn};

use kmsseat::config::Config;
use kmsseat::drm::kms;
use kmsseat::event_loop::{LoopHandle, PollLoop};
use kmsseat::gpu;
use kmsseat::session::Session;

/// Poll timeout so a shutdown signal is noticed even without fd activity
const POLL_TIMEOUT_MS: i32 = 1000;

/// Shutdown requested via signal (SIGTERM/SIGINT/SIGHUP)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Handles SIGTERM (systemd stop), SIGINT (Ctrl+C), and SIGHUP (terminal hangup).
fn setup_signal_handlers() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

/// Print help message
fn print_help() {
    println!(
        r#"kmsseat {} - seat session and primary GPU holder for KMS compositors

USAGE:
    kmsseat [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --gpu                   Print the selected GPU node and exit

ENVIRONMENT:
    KMSSEAT_CONFIG          Config file path
    RUST_LOG                Log filter (default: warn)

CONFIG FILE:
    ~/.config/kmsseat/config.toml
    /etc/kmsseat/config.toml
"#,
        env!("CARGO_PKG_VERSION")
    );
}

/// Device node behind a session fd, for display
fn node_path(fd: RawFd) -> String {
    std::fs::read_link(format!("/proc/self/fd/{}", fd))
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| format!("fd {}", fd))
}

/// Open the configured card, or run discovery
fn select_gpu(session: &mut Session, config: &Config) -> Result<RawFd> {
    if let Some(path) = config.gpu.device_path() {
        info!("Using configured GPU {}", path.display());
        return session
            .open_file(path)
            .with_context(|| format!("Failed to open GPU {}", path.display()));
    }

    gpu::find_primary_gpu(session)
        .context("GPU discovery failed")?
        .ok_or_else(|| anyhow!("No KMS-capable GPU found"))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = std::env::args().collect();

    // --help
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // --version
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("kmsseat {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let print_gpu_only = args.iter().any(|a| a == "--gpu");

    info!("kmsseat starting...");
    let config = Config::load();
    debug!("Config: {:?}", config);

    setup_signal_handlers();

    let poll_loop = Rc::new(RefCell::new(PollLoop::new()));
    let handle: LoopHandle = poll_loop.clone();

    let mut session = Session::create_with_backend(&handle, config.session.backend)
        .context("Failed to create session")?;

    let gpu_fd = match select_gpu(&mut session, &config) {
        Ok(fd) => fd,
        Err(e) => {
            session.destroy();
            return Err(e);
        }
    };
    let gpu_node = node_path(gpu_fd);

    if print_gpu_only {
        println!("{}", gpu_node);
        session.close_file(gpu_fd);
        session.destroy();
        return Ok(());
    }

    info!("Primary GPU: {} (fd {})", gpu_node, gpu_fd);

    if config.log.hotplug {
        let node = gpu_node.clone();
        session.signal_add(gpu_fd, move |change| {
            info!(
                "{} changed ({}:{}), connectors need a rescan",
                node,
                libc::major(change.dev),
                libc::minor(change.dev)
            );
        });
    }
    session.active_signal_add(|active| {
        if *active {
            info!("Session active, display access regained");
        } else {
            info!("Session inactive, display access lost");
        }
    });

    if let Some(fd) = session.borrow_fd(gpu_fd) {
        match kms::query_counts(fd) {
            Ok(counts) => info!(
                "{}: {} CRTCs, {} connectors, {} encoders",
                gpu_node, counts.crtcs, counts.connectors, counts.encoders
            ),
            Err(e) => warn!("Failed to query KMS resources on {}: {}", gpu_node, e),
        }
    }

    // Notify systemd that we're ready (Type=notify)
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]);

    while !shutdown_requested() {
        let ready = poll_loop.borrow().wait(POLL_TIMEOUT_MS);
        let ready = match ready {
            Ok(ready) => ready,
            Err(e) => {
                warn!("poll failed: {}", e);
                break;
            }
        };
        for source in ready {
            if !session.dispatch(source) {
                trace!("Ignoring foreign source {:?}", source);
            }
        }
    }

    info!("Shutting down...");
    let _ = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]);

    session.close_file(gpu_fd);
    session.destroy();
    Ok(())
}
