//! The two location phases.
//!
//! `locate_market_premises` walks premises created by deduplication that have
//! no geoname yet and resolves one from the best market record in the chain.
//! `resolve_roundup_movements` walks movements whose endpoints are not yet
//! associated and gives each endpoint a premises, disambiguating paired
//! multi-candidate locations by inter-county distance.

use anyhow::Result;
use log::{info, warn};

use crate::errors::{self, ResolveError};
use crate::geocode::{GeocodeResolver, PlaceCandidate, PlaceSearch, Resolution, StructuredLookup};
use crate::models::{Address, Association, Geoname, GeonameId, NewGeoname, Premises, PremisesId};
use crate::premises::distance::{minimize_distance, DistanceLookup};
use crate::store::MarketStore;
use crate::utils::constants::{fuzzy_score, MOST_FUZZY_MARKET, MOST_FUZZY_MAX};

fn new_geoname(address: &Address, place: &PlaceCandidate, resolution: &Resolution) -> NewGeoname {
    NewGeoname {
        address_id: Some(address.id),
        geoname_ref: Some(place.geoname_ref),
        admin1: Some(place.admin1.clone()),
        admin2: Some(place.admin2.clone()),
        fuzzy: resolution.fuzzy.map(fuzzy_score),
    }
}

/// Resolve a location for every premises that deduplication created without
/// one. Returns the number of premises processed.
pub async fn locate_market_premises<S, P, L>(
    store: &S,
    resolver: &GeocodeResolver<P, L>,
) -> Result<usize>
where
    S: MarketStore,
    P: PlaceSearch,
    L: StructuredLookup,
{
    let pending = store.unlocated_premises().await?;
    let mut located = 0;
    for premises_id in &pending {
        store.begin().await?;
        match locate_one(store, resolver, *premises_id).await {
            Ok(()) => {
                store.commit().await?;
                located += 1;
            }
            Err(err) => {
                store.rollback().await?;
                if errors::is_fatal(&err) {
                    return Err(err);
                }
                warn!("Skipping premises {}: {:#}", premises_id, err);
            }
        }
    }
    info!(
        "Market location complete: {} of {} premises located",
        located,
        pending.len()
    );
    Ok(located)
}

/// Markets are tried in preference order until one yields a single
/// candidate. Anything else, ambiguous or empty, becomes the sentinel.
async fn locate_one<S, P, L>(
    store: &S,
    resolver: &GeocodeResolver<P, L>,
    premises_id: PremisesId,
) -> Result<()>
where
    S: MarketStore,
    P: PlaceSearch,
    L: StructuredLookup,
{
    let markets = store.markets_for_premises(premises_id).await?;

    let mut resolution = Resolution::default();
    let mut located: Option<&Address> = None;
    for market in &markets {
        resolution = resolver
            .resolve(&market.location(), MOST_FUZZY_MARKET)
            .await?;
        located = Some(market);
        if resolution.single().is_some() {
            break;
        }
    }

    let geoname = match resolution.single() {
        Some(place) => {
            let market = located.ok_or_else(|| {
                ResolveError::DataIntegrity(format!(
                    "premises {} resolved without a market record",
                    premises_id
                ))
            })?;
            new_geoname(market, place, &resolution)
        }
        None => {
            if resolution.is_ambiguous() {
                warn!(
                    "{}",
                    ResolveError::AmbiguousMatch {
                        context: format!("premises {}", premises_id),
                        candidates: resolution.candidates.len(),
                    }
                );
            } else {
                info!("No location found for premises {}", premises_id);
            }
            NewGeoname::sentinel(located.map(|market| market.id))
        }
    };

    let geoname = store.insert_geoname(geoname).await?;
    store
        .set_premises_geoname(premises_id, Some(geoname.id))
        .await?;
    Ok(())
}

/// Give both endpoints of every unassigned movement a premises. Returns the
/// number of endpoint pairs processed.
pub async fn resolve_roundup_movements<S, P, L, D>(
    store: &S,
    resolver: &GeocodeResolver<P, L>,
    distances: &D,
) -> Result<usize>
where
    S: MarketStore,
    P: PlaceSearch,
    L: StructuredLookup,
    D: DistanceLookup,
{
    let pending = store.unassigned_movement_endpoints().await?;
    let mut resolved = 0;
    for (from_id, to_id) in &pending {
        store.begin().await?;
        match resolve_pair(store, resolver, distances, *from_id, *to_id).await {
            Ok(()) => {
                store.commit().await?;
                resolved += 1;
            }
            Err(err) => {
                store.rollback().await?;
                if errors::is_fatal(&err) {
                    return Err(err);
                }
                warn!(
                    "Skipping movement endpoints {} -> {}: {:#}",
                    from_id, to_id, err
                );
            }
        }
    }
    info!(
        "Movement resolution complete: {} of {} endpoint pairs resolved",
        resolved,
        pending.len()
    );
    Ok(resolved)
}

async fn resolve_pair<S, P, L, D>(
    store: &S,
    resolver: &GeocodeResolver<P, L>,
    distances: &D,
    from_id: i64,
    to_id: i64,
) -> Result<()>
where
    S: MarketStore,
    P: PlaceSearch,
    L: StructuredLookup,
    D: DistanceLookup,
{
    let from_address = store.address_by_id(from_id).await?;
    let to_address = store.address_by_id(to_id).await?;

    let from_geonames = endpoint_geonames(store, resolver, &from_address).await?;
    let to_geonames = endpoint_geonames(store, resolver, &to_address).await?;

    let minimized = minimize_distance(distances, &from_geonames, &to_geonames).await?;

    if !from_address.source.is_roundup_market() {
        let chosen = minimized.as_ref().map(|(origin, _)| origin.id);
        let premises = endpoint_premises(store, &from_address, chosen, &from_geonames).await?;
        store
            .insert_association(Association {
                premises_id: premises.id,
                address_id: from_address.id,
                to_address_id: Some(to_address.id),
                from_address_id: None,
            })
            .await?;
    }
    if !to_address.source.is_roundup_market() {
        let chosen = minimized.as_ref().map(|(_, destination)| destination.id);
        let premises = endpoint_premises(store, &to_address, chosen, &to_geonames).await?;
        store
            .insert_association(Association {
                premises_id: premises.id,
                address_id: to_address.id,
                to_address_id: None,
                from_address_id: Some(from_address.id),
            })
            .await?;
    }
    Ok(())
}

/// Candidate geonames for one movement endpoint. Markets answer with the
/// geoname their premises already owns; roundup addresses hit the location
/// cache first and only then the external services, storing whatever comes
/// back (the sentinel included) so identical locations are never searched
/// twice.
async fn endpoint_geonames<S, P, L>(
    store: &S,
    resolver: &GeocodeResolver<P, L>,
    address: &Address,
) -> Result<Vec<Geoname>>
where
    S: MarketStore,
    P: PlaceSearch,
    L: StructuredLookup,
{
    if address.source.is_roundup_market() {
        let premises = store.premises_for_address(address.id).await?.ok_or_else(|| {
            ResolveError::DataIntegrity(format!("market address {} has no premises", address.id))
        })?;
        let geoname_id = premises.geoname_id.ok_or_else(|| {
            ResolveError::DataIntegrity(format!("market premises {} has no geoname", premises.id))
        })?;
        return Ok(vec![store.geoname_by_id(geoname_id).await?]);
    }

    if let Some(cached) = store.cached_geonames_for_location(&address.location()).await? {
        return Ok(cached);
    }

    let resolution = resolver.resolve(&address.location(), MOST_FUZZY_MAX).await?;
    if resolution.is_empty() {
        let sentinel = store
            .insert_geoname(NewGeoname::sentinel(Some(address.id)))
            .await?;
        return Ok(vec![sentinel]);
    }
    let mut geonames = Vec::with_capacity(resolution.candidates.len());
    for place in &resolution.candidates {
        geonames.push(
            store
                .insert_geoname(new_geoname(address, place, &resolution))
                .await?,
        );
    }
    Ok(geonames)
}

/// Premises for one endpoint once a geoname is chosen, or the fallback
/// order when none was: the sole candidate, an existing sentinel among the
/// candidates, or a fresh sentinel.
async fn endpoint_premises<S: MarketStore>(
    store: &S,
    address: &Address,
    chosen: Option<GeonameId>,
    geonames: &[Geoname],
) -> Result<Premises> {
    let geoname_id = match chosen {
        Some(id) => id,
        None => match geonames {
            [only] => only.id,
            _ => match geonames.iter().find(|geoname| geoname.is_empty()) {
                Some(sentinel) => sentinel.id,
                None => {
                    store
                        .insert_geoname(NewGeoname::sentinel(Some(address.id)))
                        .await?
                        .id
                }
            },
        },
    };
    store.insert_premises(Some(geoname_id)).await
}
