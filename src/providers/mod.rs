//! Stock-photo search backends behind one `ImageProvider` capability.
//!
//! Each adapter maps its backend's result page onto [`ResultItem`]s and lets
//! [`pick_best`] score them; scores are only compared within one call.

mod pexels;
mod pixabay;
mod unsplash;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::trace;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::query::QueryProfile;
use crate::scoring::{round_score, score_candidate};

pub use pexels::PexelsProvider;
pub use pixabay::PixabayProvider;
pub use unsplash::UnsplashProvider;

pub const PAGE_SIZE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Pixabay,
    Pexels,
    Unsplash,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [
        ProviderKind::Pixabay,
        ProviderKind::Pexels,
        ProviderKind::Unsplash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Pixabay => "pixabay",
            ProviderKind::Pexels => "pexels",
            ProviderKind::Unsplash => "unsplash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pixabay" => Some(ProviderKind::Pixabay),
            "pexels" => Some(ProviderKind::Pexels),
            "unsplash" => Some(ProviderKind::Unsplash),
            _ => None,
        }
    }

    pub fn license_label(&self) -> &'static str {
        match self {
            ProviderKind::Pixabay => "Pixabay License",
            ProviderKind::Pexels => "Pexels License",
            ProviderKind::Unsplash => "Unsplash License",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored image result; lives only while one place is being resolved.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub provider: ProviderKind,
    pub provider_asset_id: String,
    pub image_url: String,
    pub photographer_name: Option<String>,
    pub attribution_url: Option<String>,
    pub license_label: String,
    pub match_score: f64,
    pub required_token_hits: usize,
    pub optional_token_hits: usize,
    pub query: String,
    pub query_strategy: String,
}

#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Best-scored result for `profile`, or `None` when the page is empty.
    async fn search(&self, profile: &QueryProfile) -> AppResult<Option<Candidate>>;
}

/// Provider-neutral view of one search result.
#[derive(Debug, Clone, Default)]
pub(crate) struct ResultItem {
    pub asset_id: String,
    pub image_url: Option<String>,
    pub pixel_area: u64,
    pub text: String,
    pub photographer_name: Option<String>,
    pub attribution_url: Option<String>,
}

pub(crate) fn pick_best(
    kind: ProviderKind,
    profile: &QueryProfile,
    items: Vec<ResultItem>,
) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for (rank, item) in items.into_iter().enumerate() {
        let Some(image_url) = item.image_url.filter(|url| !url.is_empty()) else {
            continue;
        };
        let scored = score_candidate(
            rank,
            item.pixel_area,
            &item.text,
            &profile.required_tokens,
            &profile.optional_tokens,
        );
        let match_score = round_score(scored.score);
        trace!(
            provider = %kind,
            rank,
            asset = %item.asset_id,
            match_score,
            "scored candidate"
        );
        if best
            .as_ref()
            .map(|current| match_score > current.match_score)
            .unwrap_or(true)
        {
            best = Some(Candidate {
                provider: kind,
                provider_asset_id: item.asset_id,
                image_url,
                photographer_name: item.photographer_name,
                attribution_url: item.attribution_url,
                license_label: kind.license_label().to_string(),
                match_score,
                required_token_hits: scored.required_hits,
                optional_token_hits: scored.optional_hits,
                query: profile.query.clone(),
                query_strategy: profile.strategy.to_string(),
            });
        }
    }
    best
}

/// Adapters for every enabled provider, in configured priority order.
pub fn build_providers(config: &AppConfig, http: &Client) -> Vec<Arc<dyn ImageProvider>> {
    config
        .enabled_providers()
        .into_iter()
        .filter_map(|kind| -> Option<Arc<dyn ImageProvider>> {
            let key = config.api_key(kind)?.clone();
            let base = config.api_base(kind).to_string();
            Some(match kind {
                ProviderKind::Pixabay => Arc::new(PixabayProvider::new(http.clone(), base, key)),
                ProviderKind::Pexels => Arc::new(PexelsProvider::new(http.clone(), base, key)),
                ProviderKind::Unsplash => {
                    Arc::new(UnsplashProvider::new(http.clone(), base, key))
                }
            })
        })
        .collect()
}

pub(crate) fn asset_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Reads an explicit `null` as the field's default, like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn pixel_area(width: Option<u64>, height: Option<u64>) -> u64 {
    width.unwrap_or(0).saturating_mul(height.unwrap_or(0))
}

pub(crate) fn join_text<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .map(|part| part.unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ")
}
