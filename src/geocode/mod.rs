//! Geocoding: turning an address into zero, one, or many geographic
//! candidates through a ladder of increasingly fuzzy external queries.

pub mod corrections;
pub mod geonames;
pub mod resolver;
pub mod structured;

pub use geonames::{GeonamesClient, PlaceSearch};
pub use resolver::{GeocodeResolver, Resolution};
pub use structured::{MapquestClient, Quality, StructuredCandidate, StructuredLookup, StructuredQuery};

/// One candidate place from the free-text place-name service, already
/// filtered to recognized states carrying a county code.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaceCandidate {
    pub geoname_ref: i64,
    pub name: String,
    /// Two-letter state code.
    pub admin1: String,
    /// Three-digit county code.
    pub admin2: String,
    /// County name, for cross-matching against structured lookups.
    pub county_name: Option<String>,
    pub lat: f64,
    pub lng: f64,
}
