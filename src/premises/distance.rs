//! Inter-county road distances, keyed by origin and destination FIPS code.

use anyhow::{Context, Result};
use log::debug;

use crate::models::Geoname;
use crate::utils::db_connect::PgPool;

/// Seam over the county origin-destination distance table.
#[allow(async_fn_in_trait)]
pub trait DistanceLookup {
    /// Road distance between two five-digit county FIPS codes, or `None`
    /// when the table has no entry for the pair.
    async fn distance(&self, origin_fips: &str, dest_fips: &str) -> Result<Option<f64>>;
}

/// The `ctyod` county origin-destination table, usually a separate database
/// from the movement store.
pub struct CountyDistanceTable {
    pool: PgPool,
}

impl CountyDistanceTable {
    pub fn new(pool: PgPool) -> Self {
        CountyDistanceTable { pool }
    }
}

impl DistanceLookup for CountyDistanceTable {
    async fn distance(&self, origin_fips: &str, dest_fips: &str) -> Result<Option<f64>> {
        let client = self
            .pool
            .get()
            .await
            .context("Failed to get client for distance lookup")?;
        let row = client
            .query_opt(
                "SELECT gcd FROM ctyod WHERE org = $1 AND dest = $2",
                &[&origin_fips, &dest_fips],
            )
            .await
            .context("Failed to query county distance")?;
        Ok(row.map(|row| row.get::<_, f64>(0)))
    }
}

/// Evaluate every origin x destination candidate pair and return the one
/// with the smallest known inter-county distance. Candidates without a county
/// FIPS code, and pairs absent from the distance table, are never selected.
pub async fn minimize_distance<D: DistanceLookup>(
    distances: &D,
    origins: &[Geoname],
    destinations: &[Geoname],
) -> Result<Option<(Geoname, Geoname)>> {
    let mut best: Option<(Geoname, Geoname)> = None;
    let mut best_distance = f64::INFINITY;

    for destination in destinations {
        let Some(dest_fips) = destination.county_fips() else {
            continue;
        };
        for origin in origins {
            let Some(origin_fips) = origin.county_fips() else {
                continue;
            };
            if let Some(distance) = distances.distance(&origin_fips, &dest_fips).await? {
                if distance < best_distance {
                    best_distance = distance;
                    best = Some((origin.clone(), destination.clone()));
                }
            }
        }
    }

    if let Some((origin, destination)) = &best {
        debug!(
            "minimal pair geonames {} -> {} at {:.0} miles",
            origin.id, destination.id, best_distance
        );
    }
    Ok(best)
}

/// Fixed distance table for tests.
#[cfg(test)]
#[derive(Default)]
pub struct FixedDistances {
    pub entries: std::collections::HashMap<(String, String), f64>,
}

#[cfg(test)]
impl FixedDistances {
    pub fn with(entries: &[(&str, &str, f64)]) -> Self {
        FixedDistances {
            entries: entries
                .iter()
                .map(|(org, dest, gcd)| ((org.to_string(), dest.to_string()), *gcd))
                .collect(),
        }
    }
}

#[cfg(test)]
impl DistanceLookup for FixedDistances {
    async fn distance(&self, origin_fips: &str, dest_fips: &str) -> Result<Option<f64>> {
        Ok(self
            .entries
            .get(&(origin_fips.to_string(), dest_fips.to_string()))
            .copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geoname(id: i64, state: Option<&str>, county: Option<&str>) -> Geoname {
        Geoname {
            id,
            address_id: None,
            geoname_ref: Some(id),
            admin1: state.map(String::from),
            admin2: county.map(String::from),
            fuzzy: None,
        }
    }

    #[tokio::test]
    async fn picks_the_pair_with_the_smallest_known_distance() {
        // Origin A sits in MT 30111; origin B has no usable county. The
        // destination set offers NE 31111 at 50 miles and MT 30087 at 10.
        let a = geoname(1, Some("MT"), Some("111"));
        let b = geoname(2, None, None);
        let y = geoname(3, Some("NE"), Some("111"));
        let z = geoname(4, Some("MT"), Some("087"));
        let distances = FixedDistances::with(&[
            ("30111", "31111", 50.0),
            ("30111", "30087", 10.0),
        ]);

        let pair = minimize_distance(&distances, &[a.clone(), b], &[y, z.clone()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pair.0.id, a.id);
        assert_eq!(pair.1.id, z.id);
    }

    #[tokio::test]
    async fn no_known_pair_yields_none() {
        let a = geoname(1, Some("MT"), Some("111"));
        let y = geoname(2, Some("NE"), Some("055"));
        let distances = FixedDistances::default();

        let pair = minimize_distance(&distances, &[a], &[y]).await.unwrap();
        assert!(pair.is_none());
    }

    #[tokio::test]
    async fn candidates_without_fips_are_skipped() {
        let sentinel = geoname(1, None, None);
        let y = geoname(2, Some("NE"), Some("055"));
        // A pair would exist if the sentinel had a county; it must not be
        // consulted at all.
        let distances = FixedDistances::with(&[("", "31055", 1.0)]);

        let pair = minimize_distance(&distances, &[sentinel], &[y]).await.unwrap();
        assert!(pair.is_none());
    }
}
