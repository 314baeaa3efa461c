//! Platform abstraction: filesystem statistics and mount discovery.

pub mod pal;
