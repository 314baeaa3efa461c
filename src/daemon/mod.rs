//! Service runtime: start-up and shutdown orchestration, signal handling.

pub mod runner;
pub mod signals;
