//! Capacity monitoring of the churn directory's filesystem.

pub mod capacity;
