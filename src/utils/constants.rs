//! Pipeline-wide constants: match thresholds, fuzziness bounds, the geocode
//! rate limit, and the state reference tables.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::Duration;

/// Full-text relevance a name match must strictly exceed within a city.
pub const FT_NAME_THRESHOLD: f64 = 5.0;
/// Full-text relevance a street-address match must strictly exceed.
pub const FT_ADDRESS_THRESHOLD: f64 = 4.0;
/// Stricter bar for name matches that cross city boundaries, since
/// cross-city name collisions ("Farmers Livestock") are common.
pub const FT_NAME_ONLY_THRESHOLD: f64 = 10.0;

/// Maps `ts_rank_cd` output onto the historical relevance scale the
/// thresholds above were calibrated against.
pub const FULLTEXT_SCALE: f64 = 30.0;

/// Fuzziness ceiling of the place-name retry ladder.
pub const MOST_FUZZY_MAX: u8 = 10;
/// Retry bound when locating market premises, where the address spelling is
/// usually reliable and a loose match is worse than none.
pub const MOST_FUZZY_MARKET: u8 = 2;

/// Enforced pause before each external geocoding call.
pub const GEOCODE_DELAY: Duration = Duration::from_millis(500);
/// Bound on any single external geocoding request. Fail, not hang.
pub const GEOCODE_TIMEOUT: Duration = Duration::from_secs(30);

/// Similarity parameter for the place-name service: fuzziness level 0 demands
/// an exact name, each level relaxes the required similarity by 0.1.
pub fn fuzzy_similarity(fuzzy: u8) -> f32 {
    0.1 * f32::from(MOST_FUZZY_MAX.saturating_sub(fuzzy))
}

/// Fuzziness level recorded against a stored geoname: 0.0 means the name
/// matched exactly, each retry level adds 0.1.
pub fn fuzzy_score(fuzzy: u8) -> f32 {
    0.1 * f32::from(fuzzy.min(MOST_FUZZY_MAX))
}

/// Which presence pattern a cross-city name-only match may pair with. The
/// chain's own pattern selects the complementary candidates; chains carrying
/// both signals, or neither, never match cross-city.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossCityRule {
    pub chain_has_address: bool,
    pub chain_has_po: bool,
    pub candidate_has_address: bool,
    pub candidate_has_po: bool,
}

pub const CROSS_CITY_RULES: &[CrossCityRule] = &[
    CrossCityRule {
        chain_has_address: true,
        chain_has_po: false,
        candidate_has_address: false,
        candidate_has_po: true,
    },
    CrossCityRule {
        chain_has_address: false,
        chain_has_po: true,
        candidate_has_address: true,
        candidate_has_po: false,
    },
];

/// State abbreviation -> two-digit state FIPS code. Also the recognized set
/// of country subdivisions: geocode candidates outside it are discarded.
pub static STATE_FIPS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("AL", "01"),
        ("AK", "02"),
        ("AZ", "04"),
        ("AR", "05"),
        ("CA", "06"),
        ("CO", "08"),
        ("CT", "09"),
        ("DE", "10"),
        ("DC", "11"),
        ("FL", "12"),
        ("GA", "13"),
        ("HI", "15"),
        ("ID", "16"),
        ("IL", "17"),
        ("IN", "18"),
        ("IA", "19"),
        ("KS", "20"),
        ("KY", "21"),
        ("LA", "22"),
        ("ME", "23"),
        ("MD", "24"),
        ("MA", "25"),
        ("MI", "26"),
        ("MN", "27"),
        ("MS", "28"),
        ("MO", "29"),
        ("MT", "30"),
        ("NE", "31"),
        ("NV", "32"),
        ("NH", "33"),
        ("NJ", "34"),
        ("NM", "35"),
        ("NY", "36"),
        ("NC", "37"),
        ("ND", "38"),
        ("OH", "39"),
        ("OK", "40"),
        ("OR", "41"),
        ("PA", "42"),
        ("RI", "44"),
        ("SC", "45"),
        ("SD", "46"),
        ("TN", "47"),
        ("TX", "48"),
        ("UT", "49"),
        ("VT", "50"),
        ("VA", "51"),
        ("WA", "53"),
        ("WV", "54"),
        ("WI", "55"),
        ("WY", "56"),
    ])
});

/// Full state name (lowercase) -> abbreviation, for reports that spell the
/// state out.
pub static STATE_ABBR: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("alabama", "AL"),
        ("alaska", "AK"),
        ("arizona", "AZ"),
        ("arkansas", "AR"),
        ("california", "CA"),
        ("colorado", "CO"),
        ("connecticut", "CT"),
        ("delaware", "DE"),
        ("district of columbia", "DC"),
        ("florida", "FL"),
        ("georgia", "GA"),
        ("hawaii", "HI"),
        ("idaho", "ID"),
        ("illinois", "IL"),
        ("indiana", "IN"),
        ("iowa", "IA"),
        ("kansas", "KS"),
        ("kentucky", "KY"),
        ("louisiana", "LA"),
        ("maine", "ME"),
        ("maryland", "MD"),
        ("massachusetts", "MA"),
        ("michigan", "MI"),
        ("minnesota", "MN"),
        ("mississippi", "MS"),
        ("missouri", "MO"),
        ("montana", "MT"),
        ("nebraska", "NE"),
        ("nevada", "NV"),
        ("new hampshire", "NH"),
        ("new jersey", "NJ"),
        ("new mexico", "NM"),
        ("new york", "NY"),
        ("north carolina", "NC"),
        ("north dakota", "ND"),
        ("ohio", "OH"),
        ("oklahoma", "OK"),
        ("oregon", "OR"),
        ("pennsylvania", "PA"),
        ("rhode island", "RI"),
        ("south carolina", "SC"),
        ("south dakota", "SD"),
        ("tennessee", "TN"),
        ("texas", "TX"),
        ("utah", "UT"),
        ("vermont", "VT"),
        ("virginia", "VA"),
        ("washington", "WA"),
        ("west virginia", "WV"),
        ("wisconsin", "WI"),
        ("wyoming", "WY"),
    ])
});

pub fn state_fips(abbr: &str) -> Option<&'static str> {
    STATE_FIPS.get(abbr).copied()
}

pub fn is_recognized_state(abbr: &str) -> bool {
    STATE_FIPS.contains_key(abbr)
}

/// Normalize a state field to its abbreviation: pass abbreviations through,
/// map spelled-out names, reject anything else.
pub fn normalize_state(state: &str) -> Option<&'static str> {
    let trimmed = state.trim();
    if let Some((abbr, _)) = STATE_FIPS.get_key_value(trimmed.to_uppercase().as_str()) {
        return Some(*abbr);
    }
    STATE_ABBR.get(trimmed.to_lowercase().as_str()).copied()
}
