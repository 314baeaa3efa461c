//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use disk_churn::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{ChurnError, Result};

// Platform
pub use crate::platform::pal::{FsStats, MountPoint, Platform, detect_platform};

// Monitor
pub use crate::monitor::capacity::{CapacityMonitor, CapacitySnapshot, DiskInfo};

// Churn
pub use crate::churn::engine::{ChurnEngine, ChurnSettings, StressStats, StressView, TickOutcome};
pub use crate::churn::slot_pool::{OccupancyBitmap, Slot, SlotPool};

// Telemetry
pub use crate::telemetry::protocol::{Envelope, RequestKind, TelemetryProtocol};
pub use crate::telemetry::server::{ObserverRegistry, TelemetryServer};
pub use crate::telemetry::static_files::StaticServer;

// Daemon
pub use crate::daemon::runner::ChurnService;
pub use crate::daemon::signals::SignalHandler;
