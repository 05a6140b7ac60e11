//! Structured geocoding backed by a MapQuest-compatible service. Used for
//! street-level lookups, deriving a city from a street or zip, and breaking
//! ties between place candidates by county.

use anyhow::Result;
use log::debug;
use serde::Deserialize;

use crate::errors::ResolveError;
use crate::utils::constants::GEOCODE_TIMEOUT;
use crate::utils::env::var_or;

/// Result precision reported by the service, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quality {
    /// Exact street address.
    Address,
    /// Street matched, house number interpolated or missing.
    Street,
    /// Zip-code centroid.
    Zip,
}

impl Quality {
    fn tag(self) -> &'static str {
        match self {
            Quality::Address => "ADDRESS",
            Quality::Street => "STREET",
            Quality::Zip => "ZIP",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ADDRESS" | "POINT" => Some(Quality::Address),
            "STREET" | "INTERSECTION" => Some(Quality::Street),
            "ZIP" | "ZIP_EXTENDED" => Some(Quality::Zip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructuredQuery {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuredCandidate {
    pub quality: Quality,
    pub city: Option<String>,
    pub county_name: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// Seam over the structured geocoder for the resolution ladder.
#[allow(async_fn_in_trait)]
pub trait StructuredLookup {
    /// Geocode a structured query, keeping only results whose precision is
    /// in `accepted`.
    async fn lookup(
        &self,
        query: &StructuredQuery,
        accepted: &[Quality],
    ) -> Result<Vec<StructuredCandidate>>;
}

pub struct MapquestClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct GeocodeResponse {
    results: Option<Vec<GeocodeResult>>,
}

#[derive(Deserialize)]
struct GeocodeResult {
    locations: Option<Vec<RawLocation>>,
}

#[derive(Deserialize)]
struct RawLocation {
    #[serde(rename = "geocodeQuality")]
    quality: Option<String>,
    #[serde(rename = "adminArea5")]
    city: Option<String>,
    #[serde(rename = "adminArea4")]
    county_name: Option<String>,
    #[serde(rename = "latLng")]
    lat_lng: Option<LatLng>,
}

#[derive(Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl RawLocation {
    fn into_candidate(self) -> Option<StructuredCandidate> {
        let quality = Quality::from_tag(self.quality.as_deref()?)?;
        let lat_lng = self.lat_lng?;
        Some(StructuredCandidate {
            quality,
            city: self.city.filter(|c| !c.is_empty()),
            county_name: self.county_name.filter(|c| !c.is_empty()),
            lat: lat_lng.lat,
            lng: lat_lng.lng,
        })
    }
}

impl MapquestClient {
    pub fn from_env() -> Result<Self> {
        let base_url = var_or("MAPQUEST_BASE_URL", "http://www.mapquestapi.com");
        let api_key = std::env::var("MAPQUEST_API_KEY")
            .map_err(|_| anyhow::anyhow!("MAPQUEST_API_KEY must be set"))?;
        let http = reqwest::Client::builder()
            .timeout(GEOCODE_TIMEOUT)
            .build()?;
        Ok(MapquestClient {
            http,
            base_url,
            api_key,
        })
    }

    #[cfg(test)]
    pub fn for_base_url(base_url: &str) -> Self {
        MapquestClient {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: "test".to_string(),
        }
    }
}

impl StructuredLookup for MapquestClient {
    async fn lookup(
        &self,
        query: &StructuredQuery,
        accepted: &[Quality],
    ) -> Result<Vec<StructuredCandidate>> {
        let url = format!("{}/geocoding/v1/address", self.base_url);
        let mut params: Vec<(&str, String)> = vec![
            ("key", self.api_key.clone()),
            ("country", "US".to_string()),
            ("maxResults", "5".to_string()),
        ];
        if let Some(street) = &query.street {
            params.push(("street", street.clone()));
        }
        if let Some(city) = &query.city {
            params.push(("city", city.clone()));
        }
        if let Some(state) = &query.state {
            params.push(("state", state.clone()));
        }
        if let Some(zip) = &query.zip {
            params.push(("postalCode", zip.clone()));
        }

        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| ResolveError::ServiceUnavailable(e.to_string()))?;
        let payload: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::ServiceUnavailable(e.to_string()))?;

        let candidates: Vec<StructuredCandidate> = payload
            .results
            .unwrap_or_default()
            .into_iter()
            .flat_map(|result| result.locations.unwrap_or_default())
            .filter_map(RawLocation::into_candidate)
            .filter(|candidate| accepted.contains(&candidate.quality))
            .collect();
        debug!(
            "structured lookup returned {} candidate(s) at {:?}",
            candidates.len(),
            accepted.iter().map(|q| q.tag()).collect::<Vec<_>>()
        );
        Ok(candidates)
    }
}
