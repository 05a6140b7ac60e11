//! Free-text place-name search backed by a GeoNames-compatible service.

use std::time::{Duration, Instant};

use anyhow::Result;
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::errors::ResolveError;
use crate::geocode::PlaceCandidate;
use crate::utils::constants::{fuzzy_similarity, GEOCODE_DELAY, GEOCODE_TIMEOUT};
use crate::utils::decisions::DecisionPolicy;
use crate::utils::env::var_or;

/// Seam over the place-name service so the resolution ladder can be tested
/// without network access.
#[allow(async_fn_in_trait)]
pub trait PlaceSearch {
    /// Populated places matching `name` in `state`, at the given fuzziness
    /// level (0 = exact, 10 = loosest).
    async fn search(&self, name: &str, state: &str, fuzzy: u8) -> Result<Vec<PlaceCandidate>>;

    /// Populated places nearest to a coordinate pair.
    async fn reverse(&self, lat: f64, lng: f64) -> Result<Vec<PlaceCandidate>>;
}

pub struct GeonamesClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    policy: DecisionPolicy,
    last_call: Mutex<Option<Instant>>,
    delay: Duration,
}

#[derive(Deserialize)]
struct SearchResponse {
    status: Option<ServiceStatus>,
    geonames: Option<Vec<RawPlace>>,
}

#[derive(Deserialize)]
struct ServiceStatus {
    message: String,
}

#[derive(Deserialize)]
struct RawPlace {
    #[serde(rename = "geonameId")]
    geoname_id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "adminCode1")]
    admin1: Option<String>,
    #[serde(rename = "adminCode2")]
    admin2: Option<String>,
    #[serde(rename = "adminName2")]
    county_name: Option<String>,
    lat: Option<String>,
    lng: Option<String>,
}

impl RawPlace {
    /// Keep only candidates in a recognized state that carry a county code;
    /// everything downstream depends on both.
    fn into_candidate(self) -> Option<PlaceCandidate> {
        let admin1 = self.admin1?;
        if !crate::utils::constants::is_recognized_state(&admin1) {
            return None;
        }
        let admin2 = self.admin2.filter(|code| !code.is_empty())?;
        Some(PlaceCandidate {
            geoname_ref: self.geoname_id?,
            name: self.name?,
            admin1,
            admin2,
            county_name: self.county_name.filter(|name| !name.is_empty()),
            lat: self.lat?.parse().ok()?,
            lng: self.lng?.parse().ok()?,
        })
    }
}

impl GeonamesClient {
    pub fn from_env(policy: DecisionPolicy) -> Result<Self> {
        let base_url = var_or("GEONAMES_BASE_URL", "http://api.geonames.org");
        let username = var_or("GEONAMES_USERNAME", "roundup");
        let http = reqwest::Client::builder()
            .timeout(GEOCODE_TIMEOUT)
            .build()?;
        Ok(GeonamesClient {
            http,
            base_url,
            username,
            policy,
            last_call: Mutex::new(None),
            delay: GEOCODE_DELAY,
        })
    }

    #[cfg(test)]
    pub fn for_base_url(base_url: &str, policy: DecisionPolicy) -> Self {
        GeonamesClient {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            username: "test".to_string(),
            policy,
            last_call: Mutex::new(None),
            delay: Duration::ZERO,
        }
    }

    /// Free accounts are rate limited; space calls out rather than burn the
    /// hourly credit on a burst.
    async fn throttle(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }

    async fn query(&self, path: &str, params: &[(&str, String)]) -> Result<Vec<PlaceCandidate>> {
        self.throttle().await;
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(params)
            .query(&[("username", self.username.as_str()), ("style", "full")])
            .send()
            .await
            .map_err(|e| ResolveError::ServiceUnavailable(e.to_string()))?;
        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::ServiceUnavailable(e.to_string()))?;

        if let Some(status) = payload.status {
            warn!("place service status: {}", status.message);
            self.policy.on_service_status(&status.message)?;
            return Ok(Vec::new());
        }

        let raw = payload.geonames.unwrap_or_default();
        let total = raw.len();
        let candidates: Vec<PlaceCandidate> = raw
            .into_iter()
            .filter_map(RawPlace::into_candidate)
            .collect();
        if candidates.len() < total {
            debug!(
                "dropped {} place candidates without a usable state/county",
                total - candidates.len()
            );
        }
        Ok(candidates)
    }
}

impl PlaceSearch for GeonamesClient {
    async fn search(&self, name: &str, state: &str, fuzzy: u8) -> Result<Vec<PlaceCandidate>> {
        self.query(
            "searchJSON",
            &[
                ("name_equals", name.to_string()),
                ("adminCode1", state.to_string()),
                ("continentCode", "NA".to_string()),
                ("featureClass", "P".to_string()),
                ("fuzzy", format!("{:.1}", fuzzy_similarity(fuzzy))),
            ],
        )
        .await
    }

    async fn reverse(&self, lat: f64, lng: f64) -> Result<Vec<PlaceCandidate>> {
        self.query(
            "findNearbyPlaceNameJSON",
            &[("lat", lat.to_string()), ("lng", lng.to_string())],
        )
        .await
    }
}
