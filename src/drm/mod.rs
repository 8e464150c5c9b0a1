//! DRM device access: udev subsystem, hotplug monitor, KMS probe and ioctls

pub mod hotplug;
pub mod ioctl_helpers;
pub mod kms;
pub mod subsystem;

pub use hotplug::UdevMonitor;
pub use kms::{is_kms, KmsCounts};
pub use subsystem::{CardNode, ChangeRecord, HotplugSource, Subsystem, UdevSubsystem};
