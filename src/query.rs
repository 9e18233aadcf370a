use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use serde::Serialize;

use crate::catalog::Place;
use crate::naming::{classify, Strictness, GENERIC_SUFFIXES};

const STOPWORDS: &[&str] = &[
    "the",
    "and",
    "for",
    "with",
    "from",
    "into",
    "near",
    "city",
    "town",
    "district",
    "travel",
    "destination",
    "tourism",
];

/// Keyword hints per tag category, indexed like `tags_vector`.
pub const TAG_HINTS: &[&[&str]] = &[
    &["forest", "nature", "mountain"],
    &["beach", "coast", "sea", "river"],
    &["city", "downtown", "skyline"],
    &["relax", "resort", "scenic"],
    &["historical", "heritage", "temple", "museum"],
    &["food", "market", "street food"],
    &["night", "neon", "nightlife"],
    &["hiking", "adventure", "outdoor"],
    &["shopping", "mall", "market"],
    &["luxury", "hotel"],
    &["exotic", "tropical"],
    &["landmark", "architecture", "monument"],
];

const TOP_TAG_CATEGORIES: usize = 2;
const LEADING_KEYWORD_QUERIES: usize = 2;
const TRAILING_KEYWORD_QUERIES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum QueryStrategy {
    TrustedPlaceName,
    Semantic(String),
    Travel,
    Landmarks,
    Tourism,
    CityCountry,
    Tag(String),
}

impl fmt::Display for QueryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryStrategy::TrustedPlaceName => f.write_str("trusted_place_name"),
            QueryStrategy::Semantic(kw) => write!(f, "city_country_semantic_{kw}"),
            QueryStrategy::Travel => f.write_str("city_country_travel"),
            QueryStrategy::Landmarks => f.write_str("city_country_landmarks"),
            QueryStrategy::Tourism => f.write_str("city_country_tourism"),
            QueryStrategy::CityCountry => f.write_str("city_country"),
            QueryStrategy::Tag(kw) => write!(f, "city_country_tag_{kw}"),
        }
    }
}

impl From<QueryStrategy> for String {
    fn from(value: QueryStrategy) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryProfile {
    pub query: String,
    pub strategy: QueryStrategy,
    pub required_tokens: Vec<String>,
    pub optional_tokens: Vec<String>,
}

/// Lowercased alphanumeric runs of `text`, unfiltered.
pub fn alphanumeric_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Shared tokenizer: alphanumeric words longer than two characters, minus stopwords.
pub fn tokenize(text: &str) -> Vec<String> {
    alphanumeric_words(text)
        .into_iter()
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

pub fn unique_keep_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let item = item.into();
        if seen.insert(item.clone()) {
            out.push(item);
        }
    }
    out
}

/// Hints of the highest-weighted tag categories; equal weights keep index order.
pub fn top_tag_keywords(tags_vector: &[f64], limit: usize) -> Vec<String> {
    let mut indexed: Vec<(usize, f64)> = tags_vector.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    unique_keep_order(
        indexed
            .into_iter()
            .take(limit)
            .filter_map(|(idx, _)| TAG_HINTS.get(idx))
            .flat_map(|hints| hints.iter().copied()),
    )
}

pub fn name_suffix_keywords(name: &str) -> Vec<String> {
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return Vec::new();
    }
    unique_keep_order(
        GENERIC_SUFFIXES
            .iter()
            .filter(|(suffix, _)| name.ends_with(suffix))
            .flat_map(|(_, hints)| hints.iter().copied()),
    )
}

pub fn build_query_profiles(place: &Place, country_name: &str) -> Vec<QueryProfile> {
    let city = place.city.trim();
    let country_name = country_name.trim();
    let place_name = place.name_en.trim();

    let base = [city, country_name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    let required_tokens = unique_keep_order(tokenize(&format!("{city} {country_name}")));
    let optional_tokens = unique_keep_order(
        top_tag_keywords(&place.tags_vector, TOP_TAG_CATEGORIES)
            .into_iter()
            .chain(name_suffix_keywords(place_name)),
    );

    let mut candidates: Vec<(String, QueryStrategy)> = Vec::new();
    if !place_name.is_empty() && !classify(place_name, city, Strictness::Query).is_synthetic() {
        candidates.push((
            format!("{place_name} {country_name}"),
            QueryStrategy::TrustedPlaceName,
        ));
    }
    for kw in optional_tokens.iter().take(LEADING_KEYWORD_QUERIES) {
        candidates.push((format!("{base} {kw}"), QueryStrategy::Semantic(kw.clone())));
    }
    candidates.extend([
        (format!("{base} travel"), QueryStrategy::Travel),
        (format!("{base} landmarks"), QueryStrategy::Landmarks),
        (format!("{base} tourism"), QueryStrategy::Tourism),
        (base.clone(), QueryStrategy::CityCountry),
    ]);
    for kw in optional_tokens
        .iter()
        .skip(LEADING_KEYWORD_QUERIES)
        .take(TRAILING_KEYWORD_QUERIES)
    {
        candidates.push((format!("{base} {kw}"), QueryStrategy::Tag(kw.clone())));
    }

    let mut seen = HashSet::new();
    let mut profiles = Vec::with_capacity(candidates.len());
    for (query, strategy) in candidates {
        let query = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if query.is_empty() || !seen.insert(query.to_lowercase()) {
            continue;
        }
        profiles.push(QueryProfile {
            query,
            strategy,
            required_tokens: required_tokens.clone(),
            optional_tokens: optional_tokens.clone(),
        });
    }
    profiles
}
