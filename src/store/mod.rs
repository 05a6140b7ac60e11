//! Relational store seam.
//!
//! The resolution engine consumes a narrow contract over the store: filtered
//! equality lookups, full-text relevance ranking (numeric score, ordered
//! descending), association-join exclusion queries, and inserts under an
//! explicit transaction scope. `postgres` is the production implementation;
//! tests run against the in-memory `memory` double.

pub mod postgres;

#[cfg(test)]
pub mod memory;

use anyhow::Result;
use std::collections::HashSet;

use crate::models::{
    Address, AddressId, AddressSource, Association, Geoname, GeonameId, Location, Movement,
    NewGeoname, NewMovement, NewReport, Premises, PremisesId, RawAddress, Report,
};

/// Search scope for dedup candidate queries. The market search space never
/// includes pre-resolved roundup markets.
#[derive(Debug, Clone)]
pub struct MatchScope {
    pub state: Option<String>,
    /// `None` lifts the city restriction (cross-city tier only).
    pub city: Option<String>,
    pub excluded: HashSet<AddressId>,
}

/// An address field dedup tiers filter or rank on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressField {
    Name,
    Address,
    Po,
}

/// Presence restriction for cross-city matching: which of address/po a
/// candidate must and must not carry.
#[derive(Debug, Clone, Copy)]
pub struct PresenceFilter {
    pub has_address: bool,
    pub has_po: bool,
}

#[allow(async_fn_in_trait)]
pub trait MarketStore {
    // Transaction scope. One report import and one dedup chain resolution
    // each run inside a single transaction; writes must be visible to
    // subsequent reads within it.
    async fn begin(&self) -> Result<()>;
    async fn commit(&self) -> Result<()>;
    async fn rollback(&self) -> Result<()>;

    // Reports and movements.
    async fn find_report_by_reference(&self, reference: &str) -> Result<Option<Report>>;
    async fn insert_report(&self, report: NewReport) -> Result<Report>;
    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement>;
    /// Distinct (from, to) endpoint pairs of movements where neither side has
    /// a premises association carrying the matching direction hint.
    async fn unassigned_movement_endpoints(&self) -> Result<Vec<(AddressId, AddressId)>>;

    // Addresses.
    async fn address_by_id(&self, id: AddressId) -> Result<Address>;
    async fn find_address_by_fields(
        &self,
        source: AddressSource,
        fields: &RawAddress,
    ) -> Result<Option<Address>>;
    async fn insert_address(&self, source: AddressSource, fields: &RawAddress) -> Result<Address>;
    /// Next market address not yet associated with any premises, excluding
    /// pre-resolved roundup markets.
    async fn first_unassociated_market(&self) -> Result<Option<Address>>;

    // Dedup candidate queries.
    async fn market_by_row(
        &self,
        source: AddressSource,
        row: i32,
        excluded: &HashSet<AddressId>,
    ) -> Result<Option<Address>>;
    async fn first_market_with_po_in(
        &self,
        scope: &MatchScope,
        po_values: &[String],
    ) -> Result<Option<Address>>;
    /// Ids of in-scope markets carrying a non-null value for `field`.
    async fn markets_with_field(
        &self,
        scope: &MatchScope,
        field: AddressField,
    ) -> Result<Vec<AddressId>>;
    /// Top-ranked full-text match of `query` against `field`, with its
    /// relevance score. Callers apply the tier threshold.
    async fn best_fulltext_match(
        &self,
        scope: &MatchScope,
        field: AddressField,
        query: &str,
        presence: Option<&PresenceFilter>,
    ) -> Result<Option<(Address, f64)>>;
    async fn first_market_in_scope(&self, scope: &MatchScope) -> Result<Option<Address>>;

    // Associations.
    async fn association_for_address(&self, address_id: AddressId) -> Result<Option<Association>>;
    /// All address ids sharing a premises with any of `ids`.
    async fn addresses_associated_with(
        &self,
        ids: &HashSet<AddressId>,
    ) -> Result<HashSet<AddressId>>;
    async fn insert_association(&self, association: Association) -> Result<()>;

    // Premises and geonames.
    async fn insert_premises(&self, geoname_id: Option<GeonameId>) -> Result<Premises>;
    async fn premises_by_id(&self, id: PremisesId) -> Result<Premises>;
    /// The unique premises associated with an address. Finding several is a
    /// data integrity violation.
    async fn premises_for_address(&self, address_id: AddressId) -> Result<Option<Premises>>;
    async fn set_premises_geoname(
        &self,
        premises_id: PremisesId,
        geoname_id: Option<GeonameId>,
    ) -> Result<()>;
    async fn insert_geoname(&self, geoname: NewGeoname) -> Result<Geoname>;
    async fn geoname_by_id(&self, id: GeonameId) -> Result<Geoname>;
    /// Cached geocode results for an address with identical non-name location
    /// fields. `None` when no such address exists; more than one cache-bearing
    /// address is a data integrity violation. The empty sentinel is a valid
    /// cached result.
    async fn cached_geonames_for_location(&self, location: &Location)
        -> Result<Option<Vec<Geoname>>>;
    /// Premises without a geoname whose associations carry no direction
    /// hints, i.e. those built by market deduplication.
    async fn unlocated_premises(&self) -> Result<Vec<PremisesId>>;
    /// Member markets of a premises, street-address-bearing records first.
    async fn markets_for_premises(&self, premises_id: PremisesId) -> Result<Vec<Address>>;
}
