//! KMS capability probe
//!
//! A card node only counts as a display GPU if mode-setting resources come
//! back with at least one CRTC, connector and encoder.

use drm::control::Device as ControlDevice;
use drm::Device as BasicDevice;
use log::{debug, info};
use std::os::unix::io::{AsFd, BorrowedFd};

/// Borrowed card fd, only used for resource queries
struct Card<'a>(BorrowedFd<'a>);

impl AsFd for Card<'_> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0
    }
}

impl BasicDevice for Card<'_> {}
impl ControlDevice for Card<'_> {}

/// Resource counts of a KMS device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmsCounts {
    pub crtcs: usize,
    pub connectors: usize,
    pub encoders: usize,
}

impl KmsCounts {
    pub fn is_display_capable(&self) -> bool {
        self.crtcs > 0 && self.connectors > 0 && self.encoders > 0
    }
}

/// Query mode-setting resource counts on an open card fd
pub fn query_counts(fd: BorrowedFd<'_>) -> std::io::Result<KmsCounts> {
    let resources = Card(fd).resource_handles()?;
    Ok(KmsCounts {
        crtcs: resources.crtcs().len(),
        connectors: resources.connectors().len(),
        encoders: resources.encoders().len(),
    })
}

/// True if `fd` is a KMS device with usable outputs
pub fn is_kms(fd: BorrowedFd<'_>) -> bool {
    match query_counts(fd) {
        Ok(counts) => {
            info!(
                "DRM resources: connectors={}, crtcs={}, encoders={}",
                counts.connectors, counts.crtcs, counts.encoders
            );
            counts.is_display_capable()
        }
        Err(e) => {
            debug!("Failed to get DRM resources: {}", e);
            false
        }
    }
}
