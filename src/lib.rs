//! kmsseat - privileged device access for KMS compositors
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │          Host event loop (poll)          │
//! ├──────────────────────────────────────────┤
//! │  Session ── Backend (libseat / direct)   │
//! │     │                                    │
//! │     ├── Device registry (fd, dev_t)      │
//! │     └── udev monitor ("drm" changes)     │
//! │                  ↓                       │
//! │         GPU discovery (boot_vga, KMS)    │
//! └──────────────────────────────────────────┘
//! ```

pub mod config;
pub mod drm;
pub mod error;
pub mod event_loop;
pub mod gpu;
pub mod session;

pub use error::{Result, SessionError};
pub use event_loop::{EventLoop, EventSource, LoopHandle, PollLoop, SourceId};
pub use gpu::find_primary_gpu;
pub use session::{BackendChoice, DeviceChange, ListenerId, Session};
