//! Livestock movement resolution: report ingestion, market address
//! deduplication, geocoding, and premises assignment.

pub mod errors;
pub mod geocode;
pub mod ingest;
pub mod matching;
pub mod models;
pub mod premises;
pub mod store;
pub mod utils;
