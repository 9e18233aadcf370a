//! Decides whether a place name is templated filler or a real, searchable name.
//!
//! Two rules share the suffix table but differ on the "city + noun" shape:
//! the catalog audit flags every short city-prefixed name, while query building
//! only distrusts those ending in a generic noun.

use std::fmt;

use crate::query::alphanumeric_words;

/// Generic name endings and the keyword hints each one implies.
pub const GENERIC_SUFFIXES: &[(&str, [&str; 2])] = &[
    ("old town quarter", ["old town", "historic center"]),
    ("national museum", ["museum", "heritage"]),
    ("art district", ["art", "gallery"]),
    ("historic fortress", ["fortress", "castle"]),
    ("royal palace", ["palace", "historic"]),
    ("temple complex", ["temple", "shrine"]),
    ("riverside walk", ["river", "waterfront"]),
    ("seaside promenade", ["seaside", "coast"]),
    ("city beach", ["beach", "coast"]),
    ("island bay", ["bay", "island"]),
    ("mountain trail", ["mountain", "hiking"]),
    ("national park", ["national park", "nature"]),
    ("botanic garden", ["garden", "nature"]),
    ("food street", ["food market", "street food"]),
    ("street food alley", ["street food", "market"]),
    ("shopping avenue", ["shopping street", "market"]),
    ("designer mall", ["shopping mall", "shopping"]),
    ("skyline observatory", ["skyline", "city view"]),
    ("modern marina", ["marina", "waterfront"]),
    ("adventure park", ["adventure", "outdoor"]),
    ("diving point", ["diving", "sea"]),
    ("surf beach", ["surf", "beach"]),
    ("cultural village", ["cultural village", "heritage"]),
    ("heritage site", ["heritage", "historical"]),
    ("landmark plaza", ["landmark", "architecture"]),
    ("old port", ["port", "harbor"]),
    ("wine region", ["vineyard", "countryside"]),
    ("spa resort", ["resort", "spa"]),
    ("desert camp", ["desert", "camp"]),
    ("snow peak", ["snow mountain", "peak"]),
];

const GENERIC_NOUNS: &[&str] = &[
    "park", "beach", "mall", "walk", "museum", "palace", "port", "bay",
];

const MAX_CITY_PREFIXED_WORDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Catalog audit: any short `"{city} ..."` name is synthetic.
    Audit,
    /// Query building: a short `"{city} ..."` name is synthetic only when it
    /// ends in a generic noun.
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntheticReason {
    EmptyName,
    Suffix(&'static str),
    CityPrefixShort,
    CityPrefixGenericNoun(String),
}

impl fmt::Display for SyntheticReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntheticReason::EmptyName => f.write_str("empty_name"),
            SyntheticReason::Suffix(suffix) => write!(f, "synthetic_suffix:{suffix}"),
            SyntheticReason::CityPrefixShort => f.write_str("city_prefix_short_generic"),
            SyntheticReason::CityPrefixGenericNoun(noun) => {
                write!(f, "city_prefix_generic_noun:{noun}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameVerdict {
    Trusted,
    Synthetic(SyntheticReason),
}

impl NameVerdict {
    pub fn is_synthetic(&self) -> bool {
        matches!(self, NameVerdict::Synthetic(_))
    }

    /// Reason string; empty for trusted names.
    pub fn reason(&self) -> String {
        match self {
            NameVerdict::Trusted => String::new(),
            NameVerdict::Synthetic(reason) => reason.to_string(),
        }
    }
}

pub fn classify(name: &str, city: &str, strictness: Strictness) -> NameVerdict {
    let name = name.trim().to_lowercase();
    let city = city.trim().to_lowercase();
    if name.is_empty() {
        return NameVerdict::Synthetic(SyntheticReason::EmptyName);
    }

    if let Some(suffix) = matching_suffixes(&name).next() {
        return NameVerdict::Synthetic(SyntheticReason::Suffix(suffix));
    }

    if !city.is_empty() && name.starts_with(&format!("{city} ")) {
        let words = alphanumeric_words(&name);
        if words.len() <= MAX_CITY_PREFIXED_WORDS {
            match strictness {
                Strictness::Audit => {
                    return NameVerdict::Synthetic(SyntheticReason::CityPrefixShort)
                }
                Strictness::Query => {
                    if let Some(last) = words.last().filter(|w| GENERIC_NOUNS.contains(&w.as_str()))
                    {
                        return NameVerdict::Synthetic(SyntheticReason::CityPrefixGenericNoun(
                            last.clone(),
                        ));
                    }
                }
            }
        }
    }

    NameVerdict::Trusted
}

/// Convenience form returning `(synthetic, reason)`.
pub fn is_synthetic(name: &str, city: &str, strictness: Strictness) -> (bool, String) {
    let verdict = classify(name, city, strictness);
    (verdict.is_synthetic(), verdict.reason())
}

/// Suffixes from [`GENERIC_SUFFIXES`] that `name` ends with, in table order.
/// Expects a trimmed, lowercased name.
pub fn matching_suffixes(name: &str) -> impl Iterator<Item = &'static str> + '_ {
    GENERIC_SUFFIXES
        .iter()
        .map(|(suffix, _)| *suffix)
        .filter(move |suffix| name.ends_with(suffix))
}
