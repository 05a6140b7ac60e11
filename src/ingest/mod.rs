//! Report ingestion: turning parsed movement report rows into report,
//! address, and movement records. Parsing the report files themselves is the
//! caller's job; this module owns idempotence, role pairing, and the
//! per-report transaction.

use anyhow::Result;
use chrono::NaiveDate;
use log::{debug, info};

use crate::errors::ResolveError;
use crate::models::{Address, AddressSource, NewMovement, NewReport, RawAddress, Report};
use crate::store::MarketStore;
use crate::utils::decisions::DecisionPolicy;

#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub date: NaiveDate,
    pub title: Option<String>,
    pub head: Option<i32>,
}

/// Per-line transaction quantities, as extracted by the parser.
#[derive(Debug, Clone, Default)]
pub struct CattleFields {
    pub cattle: Option<String>,
    pub head: Option<String>,
    pub avg_weight: Option<i32>,
    pub price: Option<f64>,
    pub price_cwt: Option<f64>,
}

impl CattleFields {
    /// Identical values across distinct quantity fields usually mean the
    /// parser sliced a line wrong.
    fn has_duplicate_values(&self) -> bool {
        let mut values: Vec<String> = Vec::new();
        if let Some(cattle) = &self.cattle {
            values.push(cattle.clone());
        }
        if let Some(head) = &self.head {
            values.push(head.clone());
        }
        if let Some(avg_weight) = self.avg_weight {
            values.push(avg_weight.to_string());
        }
        if let Some(price) = self.price {
            values.push(price.to_string());
        }
        if let Some(price_cwt) = self.price_cwt {
            values.push(price_cwt.to_string());
        }
        let distinct: std::collections::HashSet<&String> = values.iter().collect();
        distinct.len() < values.len()
    }
}

/// One report line: up to three parties plus the transaction quantities.
/// Blank parties are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct MovementRow {
    pub sale: Option<RawAddress>,
    pub consignor: Option<RawAddress>,
    pub buyer: Option<RawAddress>,
    pub cattle: CattleFields,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportOutcome {
    /// The report was new; this many movements were inserted.
    Imported(usize),
    /// A report with this reference already exists; nothing was written.
    AlreadyEntered,
}

/// Import one parsed report. Re-importing a reference that already exists is
/// a no-op; a malformed row rejects and rolls back the whole report.
pub async fn import_report<S: MarketStore>(
    store: &S,
    policy: &DecisionPolicy,
    reference: &str,
    header: &ReportHeader,
    rows: &[MovementRow],
) -> Result<ImportOutcome> {
    if store.find_report_by_reference(reference).await?.is_some() {
        info!("Report {} already entered", reference);
        return Ok(ImportOutcome::AlreadyEntered);
    }

    store.begin().await?;
    match import_rows(store, policy, reference, header, rows).await {
        Ok(movements) => {
            store.commit().await?;
            info!("Report {}: {} movements imported", reference, movements);
            Ok(ImportOutcome::Imported(movements))
        }
        Err(err) => {
            store.rollback().await?;
            Err(err)
        }
    }
}

async fn import_rows<S: MarketStore>(
    store: &S,
    policy: &DecisionPolicy,
    reference: &str,
    header: &ReportHeader,
    rows: &[MovementRow],
) -> Result<usize> {
    let report = store
        .insert_report(NewReport {
            reference: reference.to_string(),
            date: header.date,
            title: header.title.clone(),
            head: header.head,
        })
        .await?;

    let mut movements = 0;
    for row in rows {
        let sale = present(&row.sale);
        let consignor = present(&row.consignor);
        let buyer = present(&row.buyer);

        match (consignor, sale, buyer) {
            (Some(consignor), Some(sale), buyer) => {
                let from = resolve_address(store, consignor).await?;
                let to = resolve_address(store, sale).await?;
                insert_movement(store, policy, &report, &from, &to, &row.cattle).await?;
                movements += 1;
                if let Some(buyer) = buyer {
                    let buyer = resolve_address(store, buyer).await?;
                    insert_movement(store, policy, &report, &to, &buyer, &row.cattle).await?;
                    movements += 1;
                }
            }
            (Some(consignor), None, Some(buyer)) => {
                let from = resolve_address(store, consignor).await?;
                let to = resolve_address(store, buyer).await?;
                insert_movement(store, policy, &report, &from, &to, &row.cattle).await?;
                movements += 1;
            }
            (None, Some(sale), Some(buyer)) => {
                let from = resolve_address(store, sale).await?;
                let to = resolve_address(store, buyer).await?;
                insert_movement(store, policy, &report, &from, &to, &row.cattle).await?;
                movements += 1;
            }
            (None, Some(_), None) => {
                // A sale with no counterpart carries no movement.
                debug!("Report {}: sale-only row skipped", reference);
            }
            (consignor, sale, buyer) => {
                return Err(ResolveError::MalformedReport {
                    reference: reference.to_string(),
                    detail: format!(
                        "row with consignor: {}, sale: {}, buyer: {}",
                        consignor.is_some(),
                        sale.is_some(),
                        buyer.is_some()
                    ),
                }
                .into());
            }
        }
    }
    Ok(movements)
}

fn present(party: &Option<RawAddress>) -> Option<&RawAddress> {
    party.as_ref().filter(|fields| !fields.is_blank())
}

/// Find or insert the address for one party. Pre-resolved markets are
/// checked before plain roundup addresses so a report naming a known market
/// reuses its record.
async fn resolve_address<S: MarketStore>(store: &S, fields: &RawAddress) -> Result<Address> {
    if let Some(market) = store
        .find_address_by_fields(AddressSource::RoundupMarket, fields)
        .await?
    {
        return Ok(market);
    }
    if let Some(existing) = store
        .find_address_by_fields(AddressSource::Roundup, fields)
        .await?
    {
        return Ok(existing);
    }
    store.insert_address(AddressSource::Roundup, fields).await
}

async fn insert_movement<S: MarketStore>(
    store: &S,
    policy: &DecisionPolicy,
    report: &Report,
    from: &Address,
    to: &Address,
    cattle: &CattleFields,
) -> Result<()> {
    if cattle.has_duplicate_values() {
        policy.confirm_duplicate_quantities(&report.reference)?;
    }
    store
        .insert_movement(NewMovement {
            report_id: report.id,
            from_address_id: from.id,
            to_address_id: to.id,
            cattle: cattle.cattle.clone(),
            head: cattle.head.clone(),
            avg_weight: cattle.avg_weight,
            price: cattle.price,
            price_cwt: cattle.price_cwt,
        })
        .await?;
    Ok(())
}
