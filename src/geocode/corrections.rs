//! City-name corrections applied before retrying a failed place search.
//!
//! Two kinds of entries: whole-name corrections for towns that show up
//! misspelled or truncated in source reports, and abbreviation expansions
//! (St. -> Saint and friends). Whole-name corrections win; otherwise every
//! expansion that applies is applied.

use once_cell::sync::Lazy;
use regex::Regex;

struct WholeName {
    pattern: Regex,
    corrected: &'static str,
}

struct Expansion {
    pattern: Regex,
    replacement: &'static str,
}

static WHOLE_NAMES: Lazy<Vec<WholeName>> = Lazy::new(|| {
    [
        (r"(?i)^white\s*sulph[ue]r(\s+springs)?$", "White Sulphur Springs"),
        (r"(?i)^pompey'?s\s+pillar$", "Pompeys Pillar"),
        (r"(?i)^heber\s+city$", "Heber"),
        (r"(?i)^miles\s+cty$", "Miles City"),
        (r"(?i)^l\.?\s*falls$", "Little Falls"),
        (r"(?i)^l\.?\s*prairie$", "Long Prairie"),
        (r"(?i)^ff$", "Fergus Falls"),
    ]
    .into_iter()
    .map(|(pattern, corrected)| WholeName {
        pattern: Regex::new(pattern).expect("whole-name pattern"),
        corrected,
    })
    .collect()
});

static EXPANSIONS: Lazy<Vec<Expansion>> = Lazy::new(|| {
    [
        (r"(?i)\bSt[\.,]\s*", "Saint "),
        (r"(?i)\bMt[\.,]\s*", "Mount "),
        (r"(?i)\bFt[\.,]\s*", "Fort "),
        (r"(?i)\bPt[\.,]\s*", "Point "),
        (r"(?i)\bN\.\s*", "North "),
        (r"(?i)\bS\.\s*", "South "),
        (r"(?i)\bW\.\s*", "West "),
        (r"(?i)\bE\.\s*", "East "),
        (r"(?i)\bSprgs\b\.?", "Springs"),
        (r"\bMc\s+", "Mc"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| Expansion {
        pattern: Regex::new(pattern).expect("expansion pattern"),
        replacement,
    })
    .collect()
});

/// Correct a city name from the fixed table. Returns `None` when nothing in
/// the table changes the input.
pub fn correct_city(city: &str) -> Option<String> {
    let trimmed = city.trim();
    for entry in WHOLE_NAMES.iter() {
        if entry.pattern.is_match(trimmed) {
            return Some(entry.corrected.to_string());
        }
    }
    let mut corrected = trimmed.to_string();
    for entry in EXPANSIONS.iter() {
        corrected = entry
            .pattern
            .replace_all(&corrected, entry.replacement)
            .into_owned();
    }
    let corrected = corrected.trim().to_string();
    if corrected != trimmed {
        Some(corrected)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_saint_abbreviation() {
        assert_eq!(correct_city("St. Louis").as_deref(), Some("Saint Louis"));
        assert_eq!(correct_city("st, cloud").as_deref(), Some("Saint cloud"));
    }

    #[test]
    fn expands_cardinal_abbreviations() {
        assert_eq!(
            correct_city("N. Platte").as_deref(),
            Some("North Platte")
        );
        assert_eq!(
            correct_city("W. Yellowstone").as_deref(),
            Some("West Yellowstone")
        );
    }

    #[test]
    fn corrects_known_towns_whole() {
        assert_eq!(
            correct_city("white sulphur").as_deref(),
            Some("White Sulphur Springs")
        );
        assert_eq!(correct_city("Heber City").as_deref(), Some("Heber"));
        assert_eq!(correct_city("L. Falls").as_deref(), Some("Little Falls"));
    }

    #[test]
    fn joins_split_mc_prefix() {
        assert_eq!(correct_city("Mc Cook").as_deref(), Some("McCook"));
    }

    #[test]
    fn leaves_clean_names_alone() {
        assert_eq!(correct_city("Billings"), None);
        assert_eq!(correct_city("Saint Paul"), None);
        // "Studio" must not trip the St. expansion.
        assert_eq!(correct_city("Sturgis"), None);
    }
}
