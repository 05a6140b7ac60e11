//! Market address deduplication.
//!
//! `next_match` walks the heuristic tiers in order of decreasing signal
//! strength: exact row identity, PO box, full-text street address, full-text
//! name, bare city fallback, and finally cross-city name-only matching at a
//! much higher bar. Each text tier consumes its candidates: every in-scope
//! record carrying the tier's field joins the exclusion set, matched or not,
//! together with addresses sharing a premises with them, so weaker tiers
//! cannot re-match what a stronger tier already considered and rejected.
//! Exclusions last for one call only; the next call starts over from the
//! chain, so a record swept up while matching someone else can still join
//! the chain on a later step.

use anyhow::Result;
use log::{debug, info};

use crate::matching::context::MatchContext;
use crate::models::{Address, Association, Premises};
use crate::store::{AddressField, MarketStore, PresenceFilter};
use crate::utils::constants::{
    CROSS_CITY_RULES, FT_ADDRESS_THRESHOLD, FT_NAME_ONLY_THRESHOLD, FT_NAME_THRESHOLD,
};

/// Find the next existing address likely to be the same physical market as
/// the context's candidate, with the premises it already resolves to, if any.
pub async fn next_match<S: MarketStore>(
    store: &S,
    ctx: &mut MatchContext,
) -> Result<Option<(Address, Option<Premises>)>> {
    ctx.reset_exclusions();

    let mut result = tier_row(store, ctx).await?;

    if result.is_none() {
        result = tier_po(store, ctx).await?;
    }
    if result.is_none() {
        result = tier_text(store, ctx, AddressField::Address, FT_ADDRESS_THRESHOLD).await?;
    }
    if result.is_none() {
        result = tier_text(store, ctx, AddressField::Name, FT_NAME_THRESHOLD).await?;
    }
    if result.is_none() {
        result = tier_city_fallback(store, ctx).await?;
    }
    if result.is_none() {
        result = tier_cross_city_name(store, ctx).await?;
    }

    let Some(matched) = result else {
        return Ok(None);
    };

    let premises = match store.association_for_address(matched.id).await? {
        Some(association) => Some(store.premises_by_id(association.premises_id).await?),
        None => None,
    };

    debug!(
        "Matched address {} to {} (premises: {:?})",
        ctx.candidate.id,
        matched.id,
        premises.as_ref().map(|p| p.id)
    );

    Ok(Some((matched, premises)))
}

/// Tier 1: records of the same source split from one directory line share a
/// row number and are duplicates no matter what else differs.
async fn tier_row<S: MarketStore>(store: &S, ctx: &MatchContext) -> Result<Option<Address>> {
    let Some(row) = ctx.candidate.row else {
        return Ok(None);
    };
    store
        .market_by_row(ctx.candidate.source, row, &ctx.excluded)
        .await
}

/// Tier 2: PO box equality within the same state and city. Every in-scope
/// record with a PO box is used up by this tier.
async fn tier_po<S: MarketStore>(store: &S, ctx: &mut MatchContext) -> Result<Option<Address>> {
    let features = ctx.features();
    if features.pos.is_empty() || ctx.candidate.city.is_none() {
        return Ok(None);
    }

    let scope = ctx.scope(true);
    let result = store.first_market_with_po_in(&scope, &features.pos).await?;

    let considered = store.markets_with_field(&scope, AddressField::Po).await?;
    ctx.excluded.extend(considered);
    let linked = store.addresses_associated_with(&ctx.excluded).await?;
    ctx.excluded.extend(linked);

    Ok(result)
}

/// Tiers 3 and 4: full-text relevance against each chain string, same state
/// and city, accepting the top-ranked candidate only above the threshold.
async fn tier_text<S: MarketStore>(
    store: &S,
    ctx: &mut MatchContext,
    field: AddressField,
    threshold: f64,
) -> Result<Option<Address>> {
    let features = ctx.features();
    let queries = match field {
        AddressField::Address => &features.addresses,
        AddressField::Name => &features.names,
        AddressField::Po => unreachable!("PO boxes are matched by equality"),
    };
    if queries.is_empty() || ctx.candidate.city.is_none() {
        return Ok(None);
    }

    let scope = ctx.scope(true);
    let mut result = None;
    for query in queries {
        if let Some((candidate, score)) = store
            .best_fulltext_match(&scope, field, query, None)
            .await?
        {
            if score > threshold {
                result = Some(candidate);
                break;
            }
            debug!(
                "Top-ranked {:?} match for '{}' scored {:.1}, below threshold {}",
                field, query, score, threshold
            );
        }
    }

    let considered = store.markets_with_field(&scope, field).await?;
    ctx.excluded.extend(considered);
    let linked = store.addresses_associated_with(&ctx.excluded).await?;
    ctx.excluded.extend(linked);

    Ok(result)
}

/// Tier 5: a chain carrying no name, address, or PO signal at all can only be
/// told apart by city and state, so the first remaining record there is it.
async fn tier_city_fallback<S: MarketStore>(
    store: &S,
    ctx: &MatchContext,
) -> Result<Option<Address>> {
    if !ctx.features().is_empty() || ctx.candidate.city.is_none() {
        return Ok(None);
    }
    store.first_market_in_scope(&ctx.scope(true)).await
}

/// Tier 6: last resort across city boundaries. Only runs when the chain
/// carries exactly one of address/PO, only pairs with candidates carrying the
/// complement, and demands a much higher relevance bar.
async fn tier_cross_city_name<S: MarketStore>(
    store: &S,
    ctx: &MatchContext,
) -> Result<Option<Address>> {
    let features = ctx.features();
    if features.names.is_empty() {
        return Ok(None);
    }

    let chain_has_address = !features.addresses.is_empty();
    let chain_has_po = !features.pos.is_empty();
    let Some(rule) = CROSS_CITY_RULES
        .iter()
        .find(|r| r.chain_has_address == chain_has_address && r.chain_has_po == chain_has_po)
    else {
        return Ok(None);
    };

    let presence = PresenceFilter {
        has_address: rule.candidate_has_address,
        has_po: rule.candidate_has_po,
    };
    let scope = ctx.scope(false);
    for name in &features.names {
        if let Some((candidate, score)) = store
            .best_fulltext_match(&scope, AddressField::Name, name, Some(&presence))
            .await?
        {
            if score > FT_NAME_ONLY_THRESHOLD {
                return Ok(Some(candidate));
            }
        }
    }
    Ok(None)
}

/// Resolve every market address not yet associated with a premises. Each
/// chain resolution is one transaction. Returns the number of chains built.
pub async fn run_market_deduplication<S: MarketStore>(store: &S) -> Result<usize> {
    let mut chains = 0;
    while let Some(market) = store.first_unassociated_market().await? {
        store.begin().await?;
        match resolve_chain(store, market).await {
            Ok(premises_id) => {
                store.commit().await?;
                chains += 1;
                debug!("Chain {} resolved to premises {}", chains, premises_id);
            }
            Err(err) => {
                store.rollback().await?;
                return Err(err);
            }
        }
    }
    info!("Market deduplication complete: {} chains resolved", chains);
    Ok(chains)
}

/// One dedup chain: follow matches until one resolves to a premises or the
/// chain runs out, then associate every member with the resulting premises.
async fn resolve_chain<S: MarketStore>(store: &S, market: Address) -> Result<i64> {
    let mut ctx = MatchContext::new(market);

    let premises = loop {
        match next_match(store, &mut ctx).await? {
            None => break None,
            Some((_, Some(premises))) => break Some(premises),
            Some((matched, None)) => ctx.extend(matched),
        }
    };

    let premises = match premises {
        Some(premises) => premises,
        None => store.insert_premises(None).await?,
    };

    // A sentinel left by an earlier failed geocode is cleared so the
    // location phase retries with the enriched chain.
    if let Some(geoname_id) = premises.geoname_id {
        let geoname = store.geoname_by_id(geoname_id).await?;
        if geoname.is_empty() {
            store.set_premises_geoname(premises.id, None).await?;
        }
    }

    for member in &ctx.chain {
        store
            .insert_association(Association {
                premises_id: premises.id,
                address_id: member.id,
                to_address_id: None,
                from_address_id: None,
            })
            .await?;
    }

    Ok(premises.id)
}
