//! Session error taxonomy

use std::io;

/// Errors surfaced by the session core and GPU discovery
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Every backend probe failed
    #[error("no session backend available")]
    NoBackendAvailable,

    /// Hardware subsystem context could not be created
    #[error("failed to create udev context: {0}")]
    ContextInitFailed(#[source] io::Error),

    /// drm hotplug monitor could not be created or enabled
    #[error("failed to create udev monitor: {0}")]
    MonitorInitFailed(#[source] io::Error),

    /// Monitor fd could not be registered with the event loop
    #[error("failed to create udev event source: {0}")]
    EventSourceFailed(#[source] io::Error),

    /// Backend refused to open a device node
    #[error("backend failed to open {path}: {source}")]
    BackendOpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    /// fstat on a freshly opened descriptor failed
    #[error("stat failed on fd {fd}: {source}")]
    StatFailed {
        fd: i32,
        #[source]
        source: io::Error,
    },

    /// drm card enumeration could not be set up
    #[error("failed to enumerate drm devices: {0}")]
    EnumerationFailed(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
