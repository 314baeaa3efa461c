#![forbid(unsafe_code)]

//! disk_churn (dchurn): sustained filesystem churn with live telemetry.
//!
//! The service fills a directory with bounded-size files and keeps creating
//! and deleting them at random for as long as it runs:
//! 1. **Churn engine**: a fixed pool of slots sized from free space, toggled one per tick
//! 2. **Capacity monitor**: refreshed disk/inode figures for the churn filesystem
//! 3. **Telemetry**: JSON request/response over WebSocket plus a static dashboard
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use disk_churn::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use disk_churn::core::config::Config;
//! use disk_churn::churn::slot_pool::SlotPool;
//! ```

pub mod prelude;

pub mod churn;
pub mod console;
pub mod core;
pub mod daemon;
pub mod logger;
pub mod monitor;
pub mod platform;
pub mod telemetry;
