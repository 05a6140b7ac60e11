//! The geocode resolution ladder: a sequence of query strategies, each tried
//! only when the previous produced nothing, ending with county-based
//! narrowing when more than one candidate survives.

use anyhow::Result;
use log::{debug, info};

use crate::geocode::corrections::correct_city;
use crate::geocode::structured::{Quality, StructuredCandidate, StructuredQuery};
use crate::geocode::{PlaceCandidate, PlaceSearch, StructuredLookup};
use crate::models::Location;
use crate::utils::constants::MOST_FUZZY_MAX;
use crate::utils::decisions::DecisionPolicy;

/// Outcome of one resolution attempt. `fuzzy` is the ladder level that
/// produced the candidates; `None` when they came from a coordinate reverse
/// lookup rather than a name search.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub candidates: Vec<PlaceCandidate>,
    pub fuzzy: Option<u8>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }

    /// The sole candidate, when resolution was unambiguous.
    pub fn single(&self) -> Option<&PlaceCandidate> {
        match self.candidates.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

pub struct GeocodeResolver<P, L> {
    places: P,
    structured: L,
    policy: DecisionPolicy,
}

impl<P: PlaceSearch, L: StructuredLookup> GeocodeResolver<P, L> {
    pub fn new(places: P, structured: L, policy: DecisionPolicy) -> Self {
        GeocodeResolver {
            places,
            structured,
            policy,
        }
    }

    /// Resolve a location to geographic candidates. `most_fuzzy` bounds the
    /// place-name retry ladder; market addresses use a tight bound because a
    /// loose match there is worse than none.
    pub async fn resolve(&self, location: &Location, most_fuzzy: u8) -> Result<Resolution> {
        let mut location = location.clone();
        let mut resolution = Resolution::default();

        if location.address.is_some() {
            if let Some(found) = self.street_tier(&location).await? {
                resolution = found;
            }
        }

        if resolution.is_empty() && location.city.is_none() {
            if let Some(city) = self.derive_city(&location).await? {
                debug!("derived city '{}' for structured-only location", city);
                location.city = Some(city);
            }
        }

        if resolution.is_empty() {
            resolution = self.fuzzy_ladder(&location, most_fuzzy).await?;
        }

        if resolution.is_empty() {
            resolution = self.corrected_retry(&location).await?;
        }

        if resolution.is_empty() && location.zip.is_some() {
            resolution = self.zip_rescue(&location).await?;
        }

        if resolution.is_ambiguous() {
            self.narrow(&location, &mut resolution).await?;
        }

        Ok(resolution)
    }

    /// Tier 1: a street address geocoded to exactly one point names the place
    /// via reverse lookup.
    async fn street_tier(&self, location: &Location) -> Result<Option<Resolution>> {
        let query = StructuredQuery {
            street: location.address.clone(),
            city: location.city.clone(),
            state: location.state.clone(),
            zip: None,
        };
        let hits = self
            .structured
            .lookup(&query, &[Quality::Address, Quality::Street])
            .await?;
        if let [only] = hits.as_slice() {
            let candidates = self.places.reverse(only.lat, only.lng).await?;
            if !candidates.is_empty() {
                return Ok(Some(Resolution {
                    candidates,
                    fuzzy: None,
                }));
            }
        }
        Ok(None)
    }

    /// Tier 2: no city on record, so derive one from the zip or the street.
    async fn derive_city(&self, location: &Location) -> Result<Option<String>> {
        let hits = if location.zip.is_some() {
            let query = StructuredQuery {
                state: location.state.clone(),
                zip: location.zip.clone(),
                ..Default::default()
            };
            self.structured.lookup(&query, &[Quality::Zip]).await?
        } else if location.address.is_some() {
            let query = StructuredQuery {
                street: location.address.clone(),
                state: location.state.clone(),
                ..Default::default()
            };
            self.structured
                .lookup(&query, &[Quality::Address, Quality::Street])
                .await?
        } else {
            Vec::new()
        };
        match hits.as_slice() {
            [only] => Ok(only.city.clone()),
            _ => Ok(None),
        }
    }

    /// Tier 3: place-name search, relaxing the similarity bar one step at a
    /// time up to the ceiling.
    async fn fuzzy_ladder(&self, location: &Location, most_fuzzy: u8) -> Result<Resolution> {
        let (Some(city), Some(state)) = (&location.city, &location.state) else {
            return Ok(Resolution::default());
        };
        for level in 0..=most_fuzzy {
            let candidates = self.places.search(city, state, level).await?;
            if !candidates.is_empty() {
                return Ok(Resolution {
                    candidates,
                    fuzzy: Some(level),
                });
            }
        }
        Ok(Resolution::default())
    }

    /// Tier 4: one exact retry with a corrected city spelling.
    async fn corrected_retry(&self, location: &Location) -> Result<Resolution> {
        let (Some(city), Some(state)) = (&location.city, &location.state) else {
            return Ok(Resolution::default());
        };
        let Some(corrected) = correct_city(city) else {
            return Ok(Resolution::default());
        };
        if !self.policy.confirm_city_correction(city, &corrected) {
            return Ok(Resolution::default());
        }
        let candidates = self.places.search(&corrected, state, 0).await?;
        Ok(Resolution {
            candidates,
            fuzzy: Some(0),
        })
    }

    /// Tier 5: last resort when a zip is known. Search at maximum fuzziness
    /// and cross-match the results against the zip's county; when that
    /// settles nothing and the zip pins down a single point, a reverse
    /// lookup on that point replaces whatever the loose search found.
    async fn zip_rescue(&self, location: &Location) -> Result<Resolution> {
        let (Some(city), Some(state)) = (&location.city, &location.state) else {
            return Ok(Resolution::default());
        };
        let found = self.places.search(city, state, MOST_FUZZY_MAX).await?;

        let query = StructuredQuery {
            state: location.state.clone(),
            zip: location.zip.clone(),
            ..Default::default()
        };
        let zip_hits = self.structured.lookup(&query, &[Quality::Zip]).await?;

        let surviving = county_filter(&found, &zip_hits);
        if let [only] = surviving.as_slice() {
            return Ok(Resolution {
                candidates: vec![only.clone()],
                fuzzy: Some(MOST_FUZZY_MAX),
            });
        }
        if let [only] = zip_hits.as_slice() {
            let candidates = self.places.reverse(only.lat, only.lng).await?;
            return Ok(Resolution {
                candidates,
                fuzzy: None,
            });
        }
        Ok(Resolution {
            candidates: found,
            fuzzy: Some(MOST_FUZZY_MAX),
        })
    }

    /// Tier 6: several candidates survived. Narrow by zip county, then by
    /// street county with and without the city. Whatever is still ambiguous
    /// after that is the caller's problem.
    async fn narrow(&self, location: &Location, resolution: &mut Resolution) -> Result<()> {
        if location.zip.is_some() {
            let query = StructuredQuery {
                state: location.state.clone(),
                zip: location.zip.clone(),
                ..Default::default()
            };
            let hits = self.structured.lookup(&query, &[Quality::Zip]).await?;
            if self.apply_narrowing(resolution, &hits) {
                return Ok(());
            }
        }
        if location.address.is_some() {
            let query = StructuredQuery {
                street: location.address.clone(),
                city: location.city.clone(),
                state: location.state.clone(),
                zip: None,
            };
            let hits = self
                .structured
                .lookup(&query, &[Quality::Address, Quality::Street])
                .await?;
            if self.apply_narrowing(resolution, &hits) {
                return Ok(());
            }

            let query = StructuredQuery {
                street: location.address.clone(),
                state: location.state.clone(),
                ..Default::default()
            };
            let hits = self
                .structured
                .lookup(&query, &[Quality::Address, Quality::Street])
                .await?;
            if self.apply_narrowing(resolution, &hits) {
                return Ok(());
            }
        }
        info!(
            "leaving {} geocode candidates ambiguous",
            resolution.candidates.len()
        );
        Ok(())
    }

    fn apply_narrowing(&self, resolution: &mut Resolution, hits: &[StructuredCandidate]) -> bool {
        let surviving = county_filter(&resolution.candidates, hits);
        if let [only] = surviving.as_slice() {
            resolution.candidates = vec![only.clone()];
            true
        } else {
            false
        }
    }
}

/// Candidates whose county name covers the county reported by any structured
/// hit. Comparison is by containment because the place service spells out
/// "Yellowstone County" where the structured service says "Yellowstone".
fn county_filter(
    candidates: &[PlaceCandidate],
    hits: &[StructuredCandidate],
) -> Vec<PlaceCandidate> {
    let counties: Vec<String> = hits
        .iter()
        .filter_map(|hit| hit.county_name.as_ref())
        .map(|name| name.to_lowercase())
        .collect();
    if counties.is_empty() {
        return Vec::new();
    }
    candidates
        .iter()
        .filter(|candidate| {
            candidate
                .county_name
                .as_ref()
                .map(|name| {
                    let name = name.to_lowercase();
                    counties.iter().any(|county| name.contains(county.as_str()))
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    use crate::utils::constants::MOST_FUZZY_MARKET;

    fn place(id: i64, name: &str, county: &str) -> PlaceCandidate {
        PlaceCandidate {
            geoname_ref: id,
            name: name.to_string(),
            admin1: "MT".to_string(),
            admin2: "111".to_string(),
            county_name: Some(county.to_string()),
            lat: 45.78,
            lng: -108.50,
        }
    }

    fn hit(quality: Quality, city: Option<&str>, county: Option<&str>) -> StructuredCandidate {
        StructuredCandidate {
            quality,
            city: city.map(String::from),
            county_name: county.map(String::from),
            lat: 45.78,
            lng: -108.50,
        }
    }

    #[derive(Default)]
    struct StubPlaces {
        search_results: HashMap<(String, u8), Vec<PlaceCandidate>>,
        reverse_results: Vec<PlaceCandidate>,
        search_calls: RefCell<Vec<(String, u8)>>,
        reverse_calls: RefCell<usize>,
    }

    impl PlaceSearch for StubPlaces {
        async fn search(&self, name: &str, _state: &str, fuzzy: u8) -> Result<Vec<PlaceCandidate>> {
            self.search_calls
                .borrow_mut()
                .push((name.to_string(), fuzzy));
            Ok(self
                .search_results
                .get(&(name.to_string(), fuzzy))
                .cloned()
                .unwrap_or_default())
        }

        async fn reverse(&self, _lat: f64, _lng: f64) -> Result<Vec<PlaceCandidate>> {
            *self.reverse_calls.borrow_mut() += 1;
            Ok(self.reverse_results.clone())
        }
    }

    #[derive(Default)]
    struct StubStructured {
        street_hits: Vec<StructuredCandidate>,
        zip_hits: Vec<StructuredCandidate>,
    }

    impl StructuredLookup for StubStructured {
        async fn lookup(
            &self,
            _query: &StructuredQuery,
            accepted: &[Quality],
        ) -> Result<Vec<StructuredCandidate>> {
            if accepted.contains(&Quality::Zip) {
                Ok(self.zip_hits.clone())
            } else {
                Ok(self.street_hits.clone())
            }
        }
    }

    fn location(
        address: Option<&str>,
        city: Option<&str>,
        state: Option<&str>,
        zip: Option<&str>,
    ) -> Location {
        Location {
            address: address.map(String::from),
            city: city.map(String::from),
            state: state.map(String::from),
            zip: zip.map(String::from),
            zip_ext: None,
        }
    }

    #[tokio::test]
    async fn street_tier_reverse_geocodes_a_single_hit() {
        let places = StubPlaces {
            reverse_results: vec![place(5640350, "Billings", "Yellowstone County")],
            ..Default::default()
        };
        let structured = StubStructured {
            street_hits: vec![hit(Quality::Address, Some("Billings"), Some("Yellowstone"))],
            ..Default::default()
        };
        let resolver =
            GeocodeResolver::new(places, structured, DecisionPolicy::fail_closed());

        let resolution = resolver
            .resolve(
                &location(Some("123 Main St"), None, Some("MT"), None),
                MOST_FUZZY_MAX,
            )
            .await
            .unwrap();

        assert_eq!(resolution.single().unwrap().geoname_ref, 5640350);
        assert_eq!(resolution.fuzzy, None);
        assert!(resolver.places.search_calls.borrow().is_empty());
    }

    #[tokio::test]
    async fn city_derived_from_zip_feeds_the_ladder() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Billings".to_string(), 0),
            vec![place(5640350, "Billings", "Yellowstone County")],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let structured = StubStructured {
            zip_hits: vec![hit(Quality::Zip, Some("Billings"), Some("Yellowstone"))],
            ..Default::default()
        };
        let resolver =
            GeocodeResolver::new(places, structured, DecisionPolicy::fail_closed());

        let resolution = resolver
            .resolve(&location(None, None, Some("MT"), Some("59101")), MOST_FUZZY_MAX)
            .await
            .unwrap();

        assert_eq!(resolution.single().unwrap().name, "Billings");
        assert_eq!(resolution.fuzzy, Some(0));
    }

    #[tokio::test]
    async fn ladder_stops_at_first_nonempty_level() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Bilings".to_string(), 2),
            vec![place(5640350, "Billings", "Yellowstone County")],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let resolver = GeocodeResolver::new(
            places,
            StubStructured::default(),
            DecisionPolicy::fail_closed(),
        );

        let resolution = resolver
            .resolve(
                &location(None, Some("Bilings"), Some("MT"), None),
                MOST_FUZZY_MAX,
            )
            .await
            .unwrap();

        assert_eq!(resolution.fuzzy, Some(2));
        let calls = resolver.places.search_calls.borrow();
        assert_eq!(
            *calls,
            vec![
                ("Bilings".to_string(), 0),
                ("Bilings".to_string(), 1),
                ("Bilings".to_string(), 2),
            ]
        );
    }

    #[tokio::test]
    async fn ladder_respects_its_ceiling() {
        let resolver = GeocodeResolver::new(
            StubPlaces::default(),
            StubStructured::default(),
            DecisionPolicy::fail_closed(),
        );

        let resolution = resolver
            .resolve(
                &location(None, Some("Nowhere"), Some("MT"), None),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert!(resolution.is_empty());
        let levels: Vec<u8> = resolver
            .places
            .search_calls
            .borrow()
            .iter()
            .map(|(_, level)| *level)
            .collect();
        assert_eq!(levels, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn corrected_spelling_retried_when_policy_accepts() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Saint Louis".to_string(), 0),
            vec![place(4407066, "Saint Louis", "Saint Louis City")],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let resolver = GeocodeResolver::new(
            places,
            StubStructured::default(),
            DecisionPolicy::auto_accept(),
        );

        let resolution = resolver
            .resolve(
                &location(None, Some("St. Louis"), Some("MO"), None),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert_eq!(resolution.single().unwrap().geoname_ref, 4407066);
        assert_eq!(resolution.fuzzy, Some(0));
    }

    #[tokio::test]
    async fn corrected_spelling_skipped_when_policy_fails_closed() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Saint Louis".to_string(), 0),
            vec![place(4407066, "Saint Louis", "Saint Louis City")],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let resolver = GeocodeResolver::new(
            places,
            StubStructured::default(),
            DecisionPolicy::fail_closed(),
        );

        let resolution = resolver
            .resolve(
                &location(None, Some("St. Louis"), Some("MO"), None),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert!(resolution.is_empty());
        assert!(!resolver
            .places
            .search_calls
            .borrow()
            .iter()
            .any(|(name, _)| name == "Saint Louis"));
    }

    #[tokio::test]
    async fn single_zip_point_replaces_county_mismatched_loose_matches() {
        let mut search_results = HashMap::new();
        // Nothing inside the market ceiling; the loosest search lands in the
        // wrong counties entirely.
        search_results.insert(
            ("Mollins".to_string(), MOST_FUZZY_MAX),
            vec![
                place(1, "Mullins", "Custer County"),
                place(2, "Molina", "Carbon County"),
            ],
        );
        let places = StubPlaces {
            search_results,
            reverse_results: vec![place(3, "Billings", "Yellowstone County")],
            ..Default::default()
        };
        let structured = StubStructured {
            zip_hits: vec![hit(Quality::Zip, Some("Billings"), Some("Yellowstone"))],
            ..Default::default()
        };
        let resolver =
            GeocodeResolver::new(places, structured, DecisionPolicy::fail_closed());

        let resolution = resolver
            .resolve(
                &location(None, Some("Mollins"), Some("MT"), Some("59101")),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert_eq!(resolution.single().unwrap().geoname_ref, 3);
        assert_eq!(resolution.fuzzy, None);
        assert_eq!(*resolver.places.reverse_calls.borrow(), 1);
    }

    #[tokio::test]
    async fn ambiguous_candidates_narrowed_by_zip_county() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Hardin".to_string(), 0),
            vec![
                place(1, "Hardin", "Big Horn County"),
                place(2, "Hardin", "Custer County"),
            ],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let structured = StubStructured {
            zip_hits: vec![hit(Quality::Zip, Some("Hardin"), Some("Big Horn"))],
            ..Default::default()
        };
        let resolver =
            GeocodeResolver::new(places, structured, DecisionPolicy::fail_closed());

        let resolution = resolver
            .resolve(
                &location(None, Some("Hardin"), Some("MT"), Some("59034")),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert_eq!(resolution.single().unwrap().geoname_ref, 1);
    }

    #[tokio::test]
    async fn unresolvable_ambiguity_is_left_to_the_caller() {
        let mut search_results = HashMap::new();
        search_results.insert(
            ("Hardin".to_string(), 0),
            vec![
                place(1, "Hardin", "Big Horn County"),
                place(2, "Hardin", "Custer County"),
            ],
        );
        let places = StubPlaces {
            search_results,
            ..Default::default()
        };
        let resolver = GeocodeResolver::new(
            places,
            StubStructured::default(),
            DecisionPolicy::fail_closed(),
        );

        let resolution = resolver
            .resolve(
                &location(None, Some("Hardin"), Some("MT"), None),
                MOST_FUZZY_MARKET,
            )
            .await
            .unwrap();

        assert!(resolution.is_ambiguous());
        assert_eq!(resolution.candidates.len(), 2);
        assert!(resolution.single().is_none());
    }
}
