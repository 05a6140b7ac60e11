//! In-memory store double for tests.
//!
//! Mirrors the Postgres contract closely enough to exercise the dedup tiers,
//! the geocode cache, and the premises assignment end to end: snapshot-based
//! rollback, and a token-count full-text score on the same threshold scale
//! the real store maps `ts_rank_cd` onto.

use anyhow::Result;
use std::cell::RefCell;
use std::collections::HashSet;

use crate::errors::ResolveError;
use crate::models::{
    Address, AddressId, AddressSource, Association, Geoname, GeonameId, Location, Movement,
    NewGeoname, NewMovement, NewReport, Premises, PremisesId, RawAddress, Report,
};
use crate::store::{AddressField, MarketStore, MatchScope, PresenceFilter};

/// Relevance contributed by each matched query token. Two matched tokens
/// clear the in-city thresholds (4, 5); four clear the cross-city bar (10).
const TOKEN_SCORE: f64 = 3.0;

#[derive(Debug, Clone, Default)]
struct Inner {
    addresses: Vec<Address>,
    geonames: Vec<Geoname>,
    premises: Vec<Premises>,
    associations: Vec<Association>,
    reports: Vec<Report>,
    movements: Vec<Movement>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemStore {
    inner: RefCell<Inner>,
    snapshot: RefCell<Option<Inner>>,
}

fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn fulltext_score(field_value: &str, query: &str) -> f64 {
    let field_tokens: HashSet<String> = tokens(field_value).into_iter().collect();
    let matched = tokens(query)
        .iter()
        .filter(|t| field_tokens.contains(*t))
        .count();
    matched as f64 * TOKEN_SCORE
}

fn field_value(address: &Address, field: AddressField) -> Option<&str> {
    match field {
        AddressField::Name => address.name.as_deref(),
        AddressField::Address => address.address.as_deref(),
        AddressField::Po => address.po.as_deref(),
    }
}

fn in_scope(address: &Address, scope: &MatchScope) -> bool {
    if !matches!(
        address.source,
        AddressSource::Ams | AddressSource::Aphis | AddressSource::Gipsa | AddressSource::Lma
    ) {
        return false;
    }
    if scope.excluded.contains(&address.id) {
        return false;
    }
    if let Some(state) = &scope.state {
        if address.state.as_deref() != Some(state.as_str()) {
            return false;
        }
    }
    if let Some(city) = &scope.city {
        if address.city.as_deref() != Some(city.as_str()) {
            return false;
        }
    }
    true
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test fixture helper: insert an address with full control of fields.
    pub fn seed_address(&self, source: AddressSource, fields: RawAddress, row: Option<i32>) -> Address {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        let address = Address {
            id,
            source,
            name: fields.name,
            address: fields.address,
            po: fields.po,
            city: fields.city,
            state: fields.state,
            zip: fields.zip,
            zip_ext: fields.zip_ext,
            row,
        };
        inner.addresses.push(address.clone());
        address
    }

    pub fn association_count(&self) -> usize {
        self.inner.borrow().associations.len()
    }

    pub fn movement_count(&self) -> usize {
        self.inner.borrow().movements.len()
    }

    pub fn premises_count(&self) -> usize {
        self.inner.borrow().premises.len()
    }

    pub fn geoname_count(&self) -> usize {
        self.inner.borrow().geonames.len()
    }

    pub fn address_count(&self) -> usize {
        self.inner.borrow().addresses.len()
    }

    pub fn associations(&self) -> Vec<Association> {
        self.inner.borrow().associations.clone()
    }
}

impl MarketStore for MemStore {
    async fn begin(&self) -> Result<()> {
        *self.snapshot.borrow_mut() = Some(self.inner.borrow().clone());
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        *self.snapshot.borrow_mut() = None;
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if let Some(snapshot) = self.snapshot.borrow_mut().take() {
            *self.inner.borrow_mut() = snapshot;
        }
        Ok(())
    }

    async fn find_report_by_reference(&self, reference: &str) -> Result<Option<Report>> {
        Ok(self
            .inner
            .borrow()
            .reports
            .iter()
            .find(|r| r.reference == reference)
            .cloned())
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        let report = Report {
            id,
            reference: report.reference,
            date: report.date,
            title: report.title,
            head: report.head,
        };
        inner.reports.push(report.clone());
        Ok(report)
    }

    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        let movement = Movement {
            id,
            report_id: movement.report_id,
            from_address_id: movement.from_address_id,
            to_address_id: movement.to_address_id,
            cattle: movement.cattle,
            head: movement.head,
            avg_weight: movement.avg_weight,
            price: movement.price,
            price_cwt: movement.price_cwt,
        };
        inner.movements.push(movement.clone());
        Ok(movement)
    }

    async fn unassigned_movement_endpoints(&self) -> Result<Vec<(AddressId, AddressId)>> {
        let inner = self.inner.borrow();
        let mut pairs: Vec<(AddressId, AddressId)> = inner
            .movements
            .iter()
            .map(|m| (m.from_address_id, m.to_address_id))
            .filter(|(from, to)| {
                let from_assigned = inner
                    .associations
                    .iter()
                    .any(|a| a.address_id == *from && a.to_address_id == Some(*to));
                let to_assigned = inner
                    .associations
                    .iter()
                    .any(|a| a.address_id == *to && a.from_address_id == Some(*from));
                !from_assigned && !to_assigned
            })
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        Ok(pairs)
    }

    async fn address_by_id(&self, id: AddressId) -> Result<Address> {
        self.inner
            .borrow()
            .addresses
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("address {} not found", id))
    }

    async fn find_address_by_fields(
        &self,
        source: AddressSource,
        fields: &RawAddress,
    ) -> Result<Option<Address>> {
        Ok(self
            .inner
            .borrow()
            .addresses
            .iter()
            .find(|a| {
                a.source == source
                    && a.name == fields.name
                    && a.address == fields.address
                    && a.po == fields.po
                    && a.city == fields.city
                    && a.state == fields.state
                    && a.zip == fields.zip
                    && a.zip_ext == fields.zip_ext
            })
            .cloned())
    }

    async fn insert_address(&self, source: AddressSource, fields: &RawAddress) -> Result<Address> {
        Ok(self.seed_address(source, fields.clone(), None))
    }

    async fn first_unassociated_market(&self) -> Result<Option<Address>> {
        let inner = self.inner.borrow();
        Ok(inner
            .addresses
            .iter()
            .filter(|a| {
                matches!(
                    a.source,
                    AddressSource::Ams
                        | AddressSource::Aphis
                        | AddressSource::Gipsa
                        | AddressSource::Lma
                )
            })
            .find(|a| !inner.associations.iter().any(|s| s.address_id == a.id))
            .cloned())
    }

    async fn market_by_row(
        &self,
        source: AddressSource,
        row: i32,
        excluded: &HashSet<AddressId>,
    ) -> Result<Option<Address>> {
        Ok(self
            .inner
            .borrow()
            .addresses
            .iter()
            .find(|a| a.source == source && a.row == Some(row) && !excluded.contains(&a.id))
            .cloned())
    }

    async fn first_market_with_po_in(
        &self,
        scope: &MatchScope,
        po_values: &[String],
    ) -> Result<Option<Address>> {
        Ok(self
            .inner
            .borrow()
            .addresses
            .iter()
            .find(|a| {
                in_scope(a, scope)
                    && a.po
                        .as_deref()
                        .map(|po| po_values.iter().any(|v| v == po))
                        .unwrap_or(false)
            })
            .cloned())
    }

    async fn markets_with_field(
        &self,
        scope: &MatchScope,
        field: AddressField,
    ) -> Result<Vec<AddressId>> {
        Ok(self
            .inner
            .borrow()
            .addresses
            .iter()
            .filter(|a| in_scope(a, scope) && field_value(a, field).is_some())
            .map(|a| a.id)
            .collect())
    }

    async fn best_fulltext_match(
        &self,
        scope: &MatchScope,
        field: AddressField,
        query: &str,
        presence: Option<&PresenceFilter>,
    ) -> Result<Option<(Address, f64)>> {
        let inner = self.inner.borrow();
        let mut best: Option<(Address, f64)> = None;
        for address in inner.addresses.iter().filter(|a| in_scope(a, scope)) {
            if let Some(presence) = presence {
                if address.address.is_some() != presence.has_address
                    || address.po.is_some() != presence.has_po
                {
                    continue;
                }
            }
            let Some(value) = field_value(address, field) else {
                continue;
            };
            let score = fulltext_score(value, query);
            if score <= 0.0 {
                continue;
            }
            let better = match &best {
                Some((_, best_score)) => score > *best_score,
                None => true,
            };
            if better {
                best = Some((address.clone(), score));
            }
        }
        Ok(best)
    }

    async fn first_market_in_scope(&self, scope: &MatchScope) -> Result<Option<Address>> {
        Ok(self
            .inner
            .borrow()
            .addresses
            .iter()
            .find(|a| in_scope(a, scope))
            .cloned())
    }

    async fn association_for_address(&self, address_id: AddressId) -> Result<Option<Association>> {
        Ok(self
            .inner
            .borrow()
            .associations
            .iter()
            .find(|a| a.address_id == address_id)
            .cloned())
    }

    async fn addresses_associated_with(
        &self,
        ids: &HashSet<AddressId>,
    ) -> Result<HashSet<AddressId>> {
        let inner = self.inner.borrow();
        let premises: HashSet<PremisesId> = inner
            .associations
            .iter()
            .filter(|a| ids.contains(&a.address_id))
            .map(|a| a.premises_id)
            .collect();
        Ok(inner
            .associations
            .iter()
            .filter(|a| premises.contains(&a.premises_id))
            .map(|a| a.address_id)
            .collect())
    }

    async fn insert_association(&self, association: Association) -> Result<()> {
        self.inner.borrow_mut().associations.push(association);
        Ok(())
    }

    async fn insert_premises(&self, geoname_id: Option<GeonameId>) -> Result<Premises> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        let premises = Premises { id, geoname_id };
        inner.premises.push(premises.clone());
        Ok(premises)
    }

    async fn premises_by_id(&self, id: PremisesId) -> Result<Premises> {
        self.inner
            .borrow()
            .premises
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("premises {} not found", id))
    }

    async fn premises_for_address(&self, address_id: AddressId) -> Result<Option<Premises>> {
        let inner = self.inner.borrow();
        let premises_ids: HashSet<PremisesId> = inner
            .associations
            .iter()
            .filter(|a| a.address_id == address_id)
            .map(|a| a.premises_id)
            .collect();
        if premises_ids.len() > 1 {
            return Err(ResolveError::DataIntegrity(format!(
                "address {} is associated with {} premises, expected one",
                address_id,
                premises_ids.len()
            ))
            .into());
        }
        Ok(premises_ids
            .into_iter()
            .next()
            .and_then(|id| inner.premises.iter().find(|p| p.id == id).cloned()))
    }

    async fn set_premises_geoname(
        &self,
        premises_id: PremisesId,
        geoname_id: Option<GeonameId>,
    ) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        let premises = inner
            .premises
            .iter_mut()
            .find(|p| p.id == premises_id)
            .ok_or_else(|| anyhow::anyhow!("premises {} not found", premises_id))?;
        premises.geoname_id = geoname_id;
        Ok(())
    }

    async fn insert_geoname(&self, geoname: NewGeoname) -> Result<Geoname> {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        let geoname = Geoname {
            id,
            address_id: geoname.address_id,
            geoname_ref: geoname.geoname_ref,
            admin1: geoname.admin1,
            admin2: geoname.admin2,
            fuzzy: geoname.fuzzy,
        };
        inner.geonames.push(geoname.clone());
        Ok(geoname)
    }

    async fn geoname_by_id(&self, id: GeonameId) -> Result<Geoname> {
        self.inner
            .borrow()
            .geonames
            .iter()
            .find(|g| g.id == id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("geoname {} not found", id))
    }

    async fn cached_geonames_for_location(
        &self,
        location: &Location,
    ) -> Result<Option<Vec<Geoname>>> {
        let inner = self.inner.borrow();
        let cache_owners: Vec<AddressId> = inner
            .addresses
            .iter()
            .filter(|a| a.location() == *location)
            .filter(|a| inner.geonames.iter().any(|g| g.address_id == Some(a.id)))
            .map(|a| a.id)
            .collect();
        match cache_owners.len() {
            0 => Ok(None),
            1 => Ok(Some(
                inner
                    .geonames
                    .iter()
                    .filter(|g| g.address_id == Some(cache_owners[0]))
                    .cloned()
                    .collect(),
            )),
            n => Err(ResolveError::DataIntegrity(format!(
                "{} addresses carry cached geonames for one location, expected one",
                n
            ))
            .into()),
        }
    }

    async fn unlocated_premises(&self) -> Result<Vec<PremisesId>> {
        let inner = self.inner.borrow();
        let mut ids: Vec<PremisesId> = inner
            .premises
            .iter()
            .filter(|p| p.geoname_id.is_none())
            .filter(|p| {
                inner.associations.iter().any(|a| {
                    a.premises_id == p.id
                        && a.to_address_id.is_none()
                        && a.from_address_id.is_none()
                })
            })
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn markets_for_premises(&self, premises_id: PremisesId) -> Result<Vec<Address>> {
        let inner = self.inner.borrow();
        let mut markets: Vec<Address> = inner
            .associations
            .iter()
            .filter(|a| a.premises_id == premises_id)
            .filter_map(|a| inner.addresses.iter().find(|addr| addr.id == a.address_id))
            .filter(|a| a.address.is_some() || a.city.is_some() || a.zip.is_some())
            .cloned()
            .collect();
        // PO-less records first, then street-address-bearing ones.
        markets.sort_by(|a, b| {
            let po_key = |addr: &Address| (addr.po.is_some(), addr.po.clone());
            let addr_key = |addr: &Address| std::cmp::Reverse(addr.address.clone());
            po_key(a)
                .cmp(&po_key(b))
                .then_with(|| addr_key(a).cmp(&addr_key(b)))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(markets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fulltext_scoring_counts_matched_tokens() {
        assert_eq!(fulltext_score("Smith Livestock Inc", "Smith Livestock"), 6.0);
        assert_eq!(fulltext_score("Smith Livestock Inc", "smith livestock inc"), 9.0);
        assert_eq!(fulltext_score("Farmers Exchange", "Smith Livestock"), 0.0);
        assert_eq!(fulltext_score("123 Oak St", "123 Oak St."), 9.0);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot() {
        let store = MemStore::new();
        store.begin().await.unwrap();
        store
            .insert_address(AddressSource::Roundup, &RawAddress::default())
            .await
            .unwrap();
        assert_eq!(store.address_count(), 1);
        store.rollback().await.unwrap();
        assert_eq!(store.address_count(), 0);
    }
}
