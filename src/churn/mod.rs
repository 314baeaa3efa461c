//! Churn engine: slot pool bookkeeping and the create/remove tick loop.

pub mod engine;
pub mod slot_pool;
