//! Entity types for the movement resolution pipeline.
//!
//! An `Address` is one observed spelling of a location; a `Premises` is the
//! canonical physical holding those spellings resolve to. `Association` is the
//! append-only many-to-many join between the two, with optional direction
//! hints recording which side of a movement the address participated as.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub type AddressId = i64;
pub type GeonameId = i64;
pub type PremisesId = i64;
pub type ReportId = i64;
pub type MovementId = i64;

/// Provenance of an address record. `RoundupMarket` records are manually
/// pre-linked to a premises and excluded from the dedup search space; every
/// other variant except `Roundup` is a scraped market directory source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSource {
    /// Observed in an ingested sale report.
    Roundup,
    /// Manually confirmed market, already resolved to a premises.
    RoundupMarket,
    Ams,
    Aphis,
    Gipsa,
    Lma,
}

impl AddressSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressSource::Roundup => "roundup",
            AddressSource::RoundupMarket => "roundup_market",
            AddressSource::Ams => "ams",
            AddressSource::Aphis => "aphis",
            AddressSource::Gipsa => "gipsa",
            AddressSource::Lma => "lma",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "roundup" => Some(AddressSource::Roundup),
            "roundup_market" => Some(AddressSource::RoundupMarket),
            "ams" => Some(AddressSource::Ams),
            "aphis" => Some(AddressSource::Aphis),
            "gipsa" => Some(AddressSource::Gipsa),
            "lma" => Some(AddressSource::Lma),
            _ => None,
        }
    }

    /// Every source except raw report addresses represents a sale location.
    pub fn is_market(&self) -> bool {
        !matches!(self, AddressSource::Roundup)
    }

    pub fn is_roundup_market(&self) -> bool {
        matches!(self, AddressSource::RoundupMarket)
    }
}

/// One observed spelling of a location holding livestock.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    pub id: AddressId,
    pub source: AddressSource,
    pub name: Option<String>,
    pub address: Option<String>,
    pub po: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub zip_ext: Option<String>,
    /// Original ingestion line number. Two records of the same source sharing
    /// a row were split from one directory line and are guaranteed duplicates.
    pub row: Option<i32>,
}

impl Address {
    /// The non-name location fields, used as the geocode cache key: two
    /// addresses with an identical `Location` must never trigger two external
    /// geocode calls.
    pub fn location(&self) -> Location {
        Location {
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
            zip_ext: self.zip_ext.clone(),
        }
    }
}

/// Fields describing a place independent of who operates there.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub zip_ext: Option<String>,
}

/// A resolved geographic point from the external geocoding service.
///
/// `geoname_ref` of `None` is the empty sentinel: the location was searched
/// and nothing was found. Storing the sentinel prevents repeated futile
/// lookups for identical input. `address_id` is a weak cache link back to the
/// address whose fields produced this result; ownership lives on `Premises`.
#[derive(Debug, Clone, PartialEq)]
pub struct Geoname {
    pub id: GeonameId,
    pub address_id: Option<AddressId>,
    pub geoname_ref: Option<i64>,
    /// Two-letter state code of the resolved place.
    pub admin1: Option<String>,
    /// Three-digit county code within the state.
    pub admin2: Option<String>,
    /// 0.0 = exact name match, rising by tenths as the query loosened.
    pub fuzzy: Option<f32>,
}

impl Geoname {
    pub fn is_empty(&self) -> bool {
        self.geoname_ref.is_none()
    }

    /// Five-digit county FIPS code, for the inter-county distance table.
    /// `None` when the state is unrecognized or the county code is missing.
    pub fn county_fips(&self) -> Option<String> {
        let admin1 = self.admin1.as_deref()?;
        let admin2 = self.admin2.as_deref()?;
        let state_fips = crate::utils::constants::state_fips(admin1)?;
        Some(format!("{}{}", state_fips, admin2))
    }
}

/// Fields for a new geoname row; the store assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewGeoname {
    pub address_id: Option<AddressId>,
    pub geoname_ref: Option<i64>,
    pub admin1: Option<String>,
    pub admin2: Option<String>,
    pub fuzzy: Option<f32>,
}

impl NewGeoname {
    /// The searched-found-nothing sentinel for a given address.
    pub fn sentinel(address_id: Option<AddressId>) -> Self {
        NewGeoname {
            address_id,
            ..Default::default()
        }
    }
}

/// The canonical physical holding. Owns at most one geoname; `None` means the
/// location is not yet resolved, which is a valid state rather than a failure.
#[derive(Debug, Clone, PartialEq)]
pub struct Premises {
    pub id: PremisesId,
    pub geoname_id: Option<GeonameId>,
}

/// Append-only join between addresses and premises. The direction hints
/// record the counterpart address of the movement that created the link and
/// disambiguate which side this address participated as.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub premises_id: PremisesId,
    pub address_id: AddressId,
    pub to_address_id: Option<AddressId>,
    pub from_address_id: Option<AddressId>,
}

/// One ingested report file.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: ReportId,
    /// Source file name; the idempotence key for re-imports.
    pub reference: String,
    pub date: NaiveDate,
    pub title: Option<String>,
    pub head: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub reference: String,
    pub date: NaiveDate,
    pub title: Option<String>,
    pub head: Option<i32>,
}

/// A transaction between two addresses, always belonging to one report.
#[derive(Debug, Clone, PartialEq)]
pub struct Movement {
    pub id: MovementId,
    pub report_id: ReportId,
    pub from_address_id: AddressId,
    pub to_address_id: AddressId,
    pub cattle: Option<String>,
    pub head: Option<String>,
    pub avg_weight: Option<i32>,
    pub price: Option<f64>,
    pub price_cwt: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct NewMovement {
    pub report_id: ReportId,
    pub from_address_id: AddressId,
    pub to_address_id: AddressId,
    pub cattle: Option<String>,
    pub head: Option<String>,
    pub avg_weight: Option<i32>,
    pub price: Option<f64>,
    pub price_cwt: Option<f64>,
}

/// Raw address fields handed over by the report parsing collaborator.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawAddress {
    pub name: Option<String>,
    pub address: Option<String>,
    pub po: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub zip_ext: Option<String>,
}

impl RawAddress {
    pub fn is_blank(&self) -> bool {
        self.name.is_none()
            && self.address.is_none()
            && self.po.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip.is_none()
            && self.zip_ext.is_none()
    }
}
