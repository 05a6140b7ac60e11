//! Explicit state for one dedup resolution attempt.
//!
//! Each tier takes the context by reference, may expand the exclusion set,
//! and returns a candidate or nothing. No tier hides state anywhere else, so
//! every tier is testable on its own.

use std::collections::HashSet;

use crate::models::{Address, AddressId};
use crate::store::MatchScope;

/// Non-null identity features gathered across the chain. Later chain members
/// broaden the feature set: a bare city/state record can still match on a
/// name contributed by an earlier member.
#[derive(Debug, Clone, Default)]
pub struct ChainFeatures {
    pub names: Vec<String>,
    pub addresses: Vec<String>,
    pub pos: Vec<String>,
}

impl ChainFeatures {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.addresses.is_empty() && self.pos.is_empty()
    }
}

/// The growing set of addresses confirmed identical during one resolution
/// attempt, the current search candidate, and the accumulated exclusions.
#[derive(Debug, Clone)]
pub struct MatchContext {
    pub candidate: Address,
    pub chain: Vec<Address>,
    pub excluded: HashSet<AddressId>,
}

impl MatchContext {
    pub fn new(candidate: Address) -> Self {
        let excluded = HashSet::from([candidate.id]);
        MatchContext {
            chain: vec![candidate.clone()],
            candidate,
            excluded,
        }
    }

    /// A confirmed match becomes the new search candidate and joins the chain.
    pub fn extend(&mut self, matched: Address) {
        self.excluded.insert(matched.id);
        self.chain.push(matched.clone());
        self.candidate = matched;
    }

    /// Exclusions hold for a single resolution step. Each step starts over
    /// from the chain itself, so a record passed over by an earlier step
    /// stays eligible once the chain has grown new features.
    pub fn reset_exclusions(&mut self) {
        self.excluded = self.chain.iter().map(|member| member.id).collect();
    }

    pub fn features(&self) -> ChainFeatures {
        let mut features = ChainFeatures::default();
        for member in &self.chain {
            if let Some(name) = &member.name {
                features.names.push(name.clone());
            }
            if let Some(address) = &member.address {
                features.addresses.push(address.clone());
            }
            if let Some(po) = &member.po {
                features.pos.push(po.clone());
            }
        }
        features
    }

    /// Search scope anchored on the candidate's state, optionally narrowed to
    /// its city, always excluding everything already ruled out.
    pub fn scope(&self, same_city: bool) -> MatchScope {
        MatchScope {
            state: self.candidate.state.clone(),
            city: if same_city {
                self.candidate.city.clone()
            } else {
                None
            },
            excluded: self.excluded.clone(),
        }
    }
}
