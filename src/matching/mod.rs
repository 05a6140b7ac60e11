//! Market address deduplication.

pub mod context;
pub mod dedup;
