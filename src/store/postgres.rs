//! Postgres implementation of the store contract.
//!
//! Holds a single pooled client for the whole run: processing is sequential,
//! later matching tiers must see records inserted by earlier ones, and the
//! report/chain transaction scope spans many calls, so transactions are
//! driven explicitly with BEGIN/COMMIT/ROLLBACK on that client.

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashSet;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::errors::ResolveError;
use crate::models::{
    Address, AddressId, AddressSource, Association, Geoname, GeonameId, Location, Movement,
    NewGeoname, NewMovement, NewReport, Premises, PremisesId, RawAddress, Report,
};
use crate::store::{AddressField, MarketStore, MatchScope, PresenceFilter};
use crate::utils::constants::FULLTEXT_SCALE;
use crate::utils::db_connect::PgPool;

const ADDRESS_COLUMNS: &str =
    "address_id, source, name, address, po, city, state, zip, zip_ext, \"row\"";

pub struct PgStore {
    client: deadpool_postgres::Client,
}

impl PgStore {
    pub async fn new(pool: &PgPool) -> Result<Self> {
        let client = pool
            .get()
            .await
            .context("Failed to get DB connection for PgStore")?;
        Ok(PgStore { client })
    }

    fn address_from_row(row: &Row) -> Result<Address> {
        let source_str: String = row.get("source");
        let source = AddressSource::from_str(&source_str).ok_or_else(|| {
            ResolveError::DataIntegrity(format!("unknown address source '{}'", source_str))
        })?;
        Ok(Address {
            id: row.get("address_id"),
            source,
            name: row.get("name"),
            address: row.get("address"),
            po: row.get("po"),
            city: row.get("city"),
            state: row.get("state"),
            zip: row.get("zip"),
            zip_ext: row.get("zip_ext"),
            row: row.get("row"),
        })
    }

    fn geoname_from_row(row: &Row) -> Geoname {
        Geoname {
            id: row.get("geoname_id"),
            address_id: row.get("address_id"),
            geoname_ref: row.get("geoname_ref"),
            admin1: row.get("admin1"),
            admin2: row.get("admin2"),
            fuzzy: row.get("fuzzy"),
        }
    }

    fn excluded_vec(excluded: &HashSet<AddressId>) -> Vec<AddressId> {
        let mut ids: Vec<AddressId> = excluded.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// WHERE fragment for the dedup search space: markets only, pre-resolved
    /// roundup markets excluded.
    fn scope_clause(
        scope: &MatchScope,
        params: &mut Vec<Box<dyn ToSql + Sync + Send>>,
    ) -> String {
        let mut clauses = vec!["source IN ('ams', 'aphis', 'gipsa', 'lma')".to_string()];

        params.push(Box::new(Self::excluded_vec(&scope.excluded)));
        clauses.push(format!("NOT (address_id = ANY(${}))", params.len()));

        if let Some(state) = &scope.state {
            params.push(Box::new(state.clone()));
            clauses.push(format!("state = ${}", params.len()));
        }
        if let Some(city) = &scope.city {
            params.push(Box::new(city.clone()));
            clauses.push(format!("city = ${}", params.len()));
        }

        clauses.join(" AND ")
    }

    fn field_column(field: AddressField) -> &'static str {
        match field {
            AddressField::Name => "name",
            AddressField::Address => "address",
            AddressField::Po => "po",
        }
    }
}

impl MarketStore for PgStore {
    async fn begin(&self) -> Result<()> {
        self.client
            .batch_execute("BEGIN")
            .await
            .context("Failed to begin transaction")
    }

    async fn commit(&self) -> Result<()> {
        self.client
            .batch_execute("COMMIT")
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(&self) -> Result<()> {
        self.client
            .batch_execute("ROLLBACK")
            .await
            .context("Failed to roll back transaction")
    }

    async fn find_report_by_reference(&self, reference: &str) -> Result<Option<Report>> {
        let row = self
            .client
            .query_opt(
                "SELECT report_id, reference, date, title, head
                 FROM report WHERE reference = $1",
                &[&reference],
            )
            .await
            .context("Failed to query report by reference")?;
        Ok(row.map(|r| Report {
            id: r.get("report_id"),
            reference: r.get("reference"),
            date: r.get("date"),
            title: r.get("title"),
            head: r.get("head"),
        }))
    }

    async fn insert_report(&self, report: NewReport) -> Result<Report> {
        let row = self
            .client
            .query_one(
                "INSERT INTO report (reference, date, title, head)
                 VALUES ($1, $2, $3, $4)
                 RETURNING report_id",
                &[&report.reference, &report.date, &report.title, &report.head],
            )
            .await
            .context("Failed to insert report")?;
        Ok(Report {
            id: row.get("report_id"),
            reference: report.reference,
            date: report.date,
            title: report.title,
            head: report.head,
        })
    }

    async fn insert_movement(&self, movement: NewMovement) -> Result<Movement> {
        let row = self
            .client
            .query_one(
                "INSERT INTO movement
                   (report_id, from_address_id, to_address_id, cattle, head,
                    avg_weight, price, price_cwt)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING movement_id",
                &[
                    &movement.report_id,
                    &movement.from_address_id,
                    &movement.to_address_id,
                    &movement.cattle,
                    &movement.head,
                    &movement.avg_weight,
                    &movement.price,
                    &movement.price_cwt,
                ],
            )
            .await
            .context("Failed to insert movement")?;
        Ok(Movement {
            id: row.get("movement_id"),
            report_id: movement.report_id,
            from_address_id: movement.from_address_id,
            to_address_id: movement.to_address_id,
            cattle: movement.cattle,
            head: movement.head,
            avg_weight: movement.avg_weight,
            price: movement.price,
            price_cwt: movement.price_cwt,
        })
    }

    async fn unassigned_movement_endpoints(&self) -> Result<Vec<(AddressId, AddressId)>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT m.from_address_id, m.to_address_id
                 FROM movement m
                 WHERE NOT EXISTS (
                         SELECT 1 FROM association a
                         WHERE a.address_id = m.from_address_id
                           AND a.to_address_id = m.to_address_id)
                   AND NOT EXISTS (
                         SELECT 1 FROM association a
                         WHERE a.address_id = m.to_address_id
                           AND a.from_address_id = m.from_address_id)
                 ORDER BY m.from_address_id, m.to_address_id",
                &[],
            )
            .await
            .context("Failed to query unassigned movement endpoints")?;
        Ok(rows
            .iter()
            .map(|r| (r.get("from_address_id"), r.get("to_address_id")))
            .collect())
    }

    async fn address_by_id(&self, id: AddressId) -> Result<Address> {
        let row = self
            .client
            .query_one(
                &format!("SELECT {} FROM address WHERE address_id = $1", ADDRESS_COLUMNS),
                &[&id],
            )
            .await
            .with_context(|| format!("Failed to load address {}", id))?;
        Self::address_from_row(&row)
    }

    async fn find_address_by_fields(
        &self,
        source: AddressSource,
        fields: &RawAddress,
    ) -> Result<Option<Address>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM address
                     WHERE source = $1
                       AND name IS NOT DISTINCT FROM $2
                       AND address IS NOT DISTINCT FROM $3
                       AND po IS NOT DISTINCT FROM $4
                       AND city IS NOT DISTINCT FROM $5
                       AND state IS NOT DISTINCT FROM $6
                       AND zip IS NOT DISTINCT FROM $7
                       AND zip_ext IS NOT DISTINCT FROM $8
                     ORDER BY address_id
                     LIMIT 1",
                    ADDRESS_COLUMNS
                ),
                &[
                    &source.as_str(),
                    &fields.name,
                    &fields.address,
                    &fields.po,
                    &fields.city,
                    &fields.state,
                    &fields.zip,
                    &fields.zip_ext,
                ],
            )
            .await
            .context("Failed to query address by fields")?;
        row.as_ref().map(Self::address_from_row).transpose()
    }

    async fn insert_address(&self, source: AddressSource, fields: &RawAddress) -> Result<Address> {
        let row = self
            .client
            .query_one(
                "INSERT INTO address (source, name, address, po, city, state, zip, zip_ext)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 RETURNING address_id",
                &[
                    &source.as_str(),
                    &fields.name,
                    &fields.address,
                    &fields.po,
                    &fields.city,
                    &fields.state,
                    &fields.zip,
                    &fields.zip_ext,
                ],
            )
            .await
            .context("Failed to insert address")?;
        Ok(Address {
            id: row.get("address_id"),
            source,
            name: fields.name.clone(),
            address: fields.address.clone(),
            po: fields.po.clone(),
            city: fields.city.clone(),
            state: fields.state.clone(),
            zip: fields.zip.clone(),
            zip_ext: fields.zip_ext.clone(),
            row: None,
        })
    }

    async fn first_unassociated_market(&self) -> Result<Option<Address>> {
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM address a
                     WHERE a.source IN ('ams', 'aphis', 'gipsa', 'lma')
                       AND NOT EXISTS (
                             SELECT 1 FROM association s
                             WHERE s.address_id = a.address_id)
                     ORDER BY a.address_id
                     LIMIT 1",
                    ADDRESS_COLUMNS
                ),
                &[],
            )
            .await
            .context("Failed to query first unassociated market")?;
        row.as_ref().map(Self::address_from_row).transpose()
    }

    async fn market_by_row(
        &self,
        source: AddressSource,
        row_value: i32,
        excluded: &HashSet<AddressId>,
    ) -> Result<Option<Address>> {
        let excluded = Self::excluded_vec(excluded);
        let row = self
            .client
            .query_opt(
                &format!(
                    "SELECT {} FROM address
                     WHERE source = $1 AND \"row\" = $2
                       AND NOT (address_id = ANY($3))
                     ORDER BY address_id
                     LIMIT 1",
                    ADDRESS_COLUMNS
                ),
                &[&source.as_str(), &row_value, &excluded],
            )
            .await
            .context("Failed to query market by row")?;
        row.as_ref().map(Self::address_from_row).transpose()
    }

    async fn first_market_with_po_in(
        &self,
        scope: &MatchScope,
        po_values: &[String],
    ) -> Result<Option<Address>> {
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        let scope_sql = Self::scope_clause(scope, &mut params);
        params.push(Box::new(po_values.to_vec()));
        let sql = format!(
            "SELECT {} FROM address WHERE {} AND po = ANY(${}) ORDER BY address_id LIMIT 1",
            ADDRESS_COLUMNS,
            scope_sql,
            params.len()
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let row = self
            .client
            .query_opt(sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to query market by PO box")?;
        row.as_ref().map(Self::address_from_row).transpose()
    }

    async fn markets_with_field(
        &self,
        scope: &MatchScope,
        field: AddressField,
    ) -> Result<Vec<AddressId>> {
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        let scope_sql = Self::scope_clause(scope, &mut params);
        let sql = format!(
            "SELECT address_id FROM address WHERE {} AND {} IS NOT NULL ORDER BY address_id",
            scope_sql,
            Self::field_column(field)
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = self
            .client
            .query(sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to query markets with non-null field")?;
        Ok(rows.iter().map(|r| r.get("address_id")).collect())
    }

    async fn best_fulltext_match(
        &self,
        scope: &MatchScope,
        field: AddressField,
        query: &str,
        presence: Option<&PresenceFilter>,
    ) -> Result<Option<(Address, f64)>> {
        let column = Self::field_column(field);
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        let mut clauses = vec![Self::scope_clause(scope, &mut params)];

        params.push(Box::new(query.to_string()));
        let query_idx = params.len();
        clauses.push(format!(
            "to_tsvector('simple', coalesce({}, '')) @@ plainto_tsquery('simple', ${})",
            column, query_idx
        ));

        if let Some(presence) = presence {
            clauses.push(format!(
                "address IS {} NULL",
                if presence.has_address { "NOT" } else { "" }
            ));
            clauses.push(format!(
                "po IS {} NULL",
                if presence.has_po { "NOT" } else { "" }
            ));
        }

        let sql = format!(
            "SELECT {}, ts_rank_cd(to_tsvector('simple', coalesce({}, '')),
                                   plainto_tsquery('simple', ${})) AS rank
             FROM address
             WHERE {}
             ORDER BY rank DESC, address_id
             LIMIT 1",
            ADDRESS_COLUMNS,
            column,
            query_idx,
            clauses.join(" AND ")
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let row = self
            .client
            .query_opt(sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to run full-text match query")?;

        match row {
            Some(row) => {
                let rank: f32 = row.get("rank");
                let score = f64::from(rank) * FULLTEXT_SCALE;
                let address = Self::address_from_row(&row)?;
                debug!(
                    "Full-text {} match for '{}': address {} scored {:.1}",
                    column, query, address.id, score
                );
                Ok(Some((address, score)))
            }
            None => Ok(None),
        }
    }

    async fn first_market_in_scope(&self, scope: &MatchScope) -> Result<Option<Address>> {
        let mut params: Vec<Box<dyn ToSql + Sync + Send>> = Vec::new();
        let scope_sql = Self::scope_clause(scope, &mut params);
        let sql = format!(
            "SELECT {} FROM address WHERE {} ORDER BY address_id LIMIT 1",
            ADDRESS_COLUMNS, scope_sql
        );
        let params_slice: Vec<&(dyn ToSql + Sync)> = params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let row = self
            .client
            .query_opt(sql.as_str(), params_slice.as_slice())
            .await
            .context("Failed to query first market in scope")?;
        row.as_ref().map(Self::address_from_row).transpose()
    }

    async fn association_for_address(&self, address_id: AddressId) -> Result<Option<Association>> {
        let row = self
            .client
            .query_opt(
                "SELECT premises_id, address_id, to_address_id, from_address_id
                 FROM association WHERE address_id = $1
                 ORDER BY premises_id LIMIT 1",
                &[&address_id],
            )
            .await
            .context("Failed to query association for address")?;
        Ok(row.map(|r| Association {
            premises_id: r.get("premises_id"),
            address_id: r.get("address_id"),
            to_address_id: r.get("to_address_id"),
            from_address_id: r.get("from_address_id"),
        }))
    }

    async fn addresses_associated_with(
        &self,
        ids: &HashSet<AddressId>,
    ) -> Result<HashSet<AddressId>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let ids = Self::excluded_vec(ids);
        let rows = self
            .client
            .query(
                "SELECT DISTINCT peer.address_id
                 FROM association own
                 JOIN association peer ON peer.premises_id = own.premises_id
                 WHERE own.address_id = ANY($1)",
                &[&ids],
            )
            .await
            .context("Failed to query associated addresses")?;
        Ok(rows.iter().map(|r| r.get("address_id")).collect())
    }

    async fn insert_association(&self, association: Association) -> Result<()> {
        self.client
            .execute(
                "INSERT INTO association
                   (premises_id, address_id, to_address_id, from_address_id)
                 VALUES ($1, $2, $3, $4)",
                &[
                    &association.premises_id,
                    &association.address_id,
                    &association.to_address_id,
                    &association.from_address_id,
                ],
            )
            .await
            .context("Failed to insert association")?;
        Ok(())
    }

    async fn insert_premises(&self, geoname_id: Option<GeonameId>) -> Result<Premises> {
        let row = self
            .client
            .query_one(
                "INSERT INTO premises (geoname_id) VALUES ($1) RETURNING premises_id",
                &[&geoname_id],
            )
            .await
            .context("Failed to insert premises")?;
        Ok(Premises {
            id: row.get("premises_id"),
            geoname_id,
        })
    }

    async fn premises_by_id(&self, id: PremisesId) -> Result<Premises> {
        let row = self
            .client
            .query_one(
                "SELECT premises_id, geoname_id FROM premises WHERE premises_id = $1",
                &[&id],
            )
            .await
            .with_context(|| format!("Failed to load premises {}", id))?;
        Ok(Premises {
            id: row.get("premises_id"),
            geoname_id: row.get("geoname_id"),
        })
    }

    async fn premises_for_address(&self, address_id: AddressId) -> Result<Option<Premises>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT p.premises_id, p.geoname_id
                 FROM premises p
                 JOIN association a ON a.premises_id = p.premises_id
                 WHERE a.address_id = $1",
                &[&address_id],
            )
            .await
            .context("Failed to query premises for address")?;
        if rows.len() > 1 {
            return Err(ResolveError::DataIntegrity(format!(
                "address {} is associated with {} premises, expected one",
                address_id,
                rows.len()
            ))
            .into());
        }
        Ok(rows.first().map(|r| Premises {
            id: r.get("premises_id"),
            geoname_id: r.get("geoname_id"),
        }))
    }

    async fn set_premises_geoname(
        &self,
        premises_id: PremisesId,
        geoname_id: Option<GeonameId>,
    ) -> Result<()> {
        self.client
            .execute(
                "UPDATE premises SET geoname_id = $1 WHERE premises_id = $2",
                &[&geoname_id, &premises_id],
            )
            .await
            .with_context(|| format!("Failed to update geoname for premises {}", premises_id))?;
        Ok(())
    }

    async fn insert_geoname(&self, geoname: NewGeoname) -> Result<Geoname> {
        let row = self
            .client
            .query_one(
                "INSERT INTO geoname (address_id, geoname_ref, admin1, admin2, fuzzy)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING geoname_id",
                &[
                    &geoname.address_id,
                    &geoname.geoname_ref,
                    &geoname.admin1,
                    &geoname.admin2,
                    &geoname.fuzzy,
                ],
            )
            .await
            .context("Failed to insert geoname")?;
        Ok(Geoname {
            id: row.get("geoname_id"),
            address_id: geoname.address_id,
            geoname_ref: geoname.geoname_ref,
            admin1: geoname.admin1,
            admin2: geoname.admin2,
            fuzzy: geoname.fuzzy,
        })
    }

    async fn geoname_by_id(&self, id: GeonameId) -> Result<Geoname> {
        let row = self
            .client
            .query_one(
                "SELECT geoname_id, address_id, geoname_ref, admin1, admin2, fuzzy
                 FROM geoname WHERE geoname_id = $1",
                &[&id],
            )
            .await
            .with_context(|| format!("Failed to load geoname {}", id))?;
        Ok(Self::geoname_from_row(&row))
    }

    async fn cached_geonames_for_location(
        &self,
        location: &Location,
    ) -> Result<Option<Vec<Geoname>>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT a.address_id
                 FROM address a
                 JOIN geoname g ON g.address_id = a.address_id
                 WHERE a.address IS NOT DISTINCT FROM $1
                   AND a.city IS NOT DISTINCT FROM $2
                   AND a.state IS NOT DISTINCT FROM $3
                   AND a.zip IS NOT DISTINCT FROM $4
                   AND a.zip_ext IS NOT DISTINCT FROM $5",
                &[
                    &location.address,
                    &location.city,
                    &location.state,
                    &location.zip,
                    &location.zip_ext,
                ],
            )
            .await
            .context("Failed to query geoname cache by location")?;

        match rows.len() {
            0 => Ok(None),
            1 => {
                let address_id: AddressId = rows[0].get("address_id");
                let geoname_rows = self
                    .client
                    .query(
                        "SELECT geoname_id, address_id, geoname_ref, admin1, admin2, fuzzy
                         FROM geoname WHERE address_id = $1
                         ORDER BY geoname_id",
                        &[&address_id],
                    )
                    .await
                    .context("Failed to load cached geonames")?;
                Ok(Some(geoname_rows.iter().map(Self::geoname_from_row).collect()))
            }
            n => Err(ResolveError::DataIntegrity(format!(
                "{} addresses carry cached geonames for one location, expected one",
                n
            ))
            .into()),
        }
    }

    async fn unlocated_premises(&self) -> Result<Vec<PremisesId>> {
        let rows = self
            .client
            .query(
                "SELECT DISTINCT p.premises_id
                 FROM premises p
                 JOIN association a ON a.premises_id = p.premises_id
                 WHERE p.geoname_id IS NULL
                   AND a.to_address_id IS NULL
                   AND a.from_address_id IS NULL
                 ORDER BY p.premises_id",
                &[],
            )
            .await
            .context("Failed to query unlocated premises")?;
        Ok(rows.iter().map(|r| r.get("premises_id")).collect())
    }

    async fn markets_for_premises(&self, premises_id: PremisesId) -> Result<Vec<Address>> {
        let rows = self
            .client
            .query(
                "SELECT a.address_id, a.source, a.name, a.address, a.po, a.city,
                        a.state, a.zip, a.zip_ext, a.\"row\"
                 FROM address a
                 JOIN association s ON s.address_id = a.address_id
                 WHERE s.premises_id = $1
                   AND (a.address IS NOT NULL OR a.city IS NOT NULL OR a.zip IS NOT NULL)
                 ORDER BY a.po ASC NULLS FIRST, a.address DESC NULLS LAST, a.address_id",
                &[&premises_id],
            )
            .await
            .context("Failed to load markets for premises")?;
        rows.iter().map(Self::address_from_row).collect()
    }
}
