//! Premises assignment: giving every address chain a physical location, and
//! picking between candidate locations by inter-county road distance.

pub mod assigner;
pub mod distance;

pub use assigner::{locate_market_premises, resolve_roundup_movements};
pub use distance::{minimize_distance, CountyDistanceTable, DistanceLookup};
