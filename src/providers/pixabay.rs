use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{
    asset_id, join_text, null_as_default, pick_best, pixel_area, Candidate, ImageProvider,
    ProviderKind, ResultItem, PAGE_SIZE,
};
use crate::errors::AppResult;
use crate::query::QueryProfile;

pub struct PixabayProvider {
    http: Client,
    api_base: String,
    api_key: SecretString,
}

impl PixabayProvider {
    pub fn new(http: Client, api_base: String, api_key: SecretString) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(rename = "largeImageURL")]
    large_image_url: Option<String>,
    #[serde(rename = "webformatURL")]
    webformat_url: Option<String>,
    #[serde(rename = "imageWidth")]
    image_width: Option<u64>,
    #[serde(rename = "imageHeight")]
    image_height: Option<u64>,
    tags: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    user: Option<String>,
    #[serde(rename = "pageURL")]
    page_url: Option<String>,
}

impl From<Hit> for ResultItem {
    fn from(hit: Hit) -> Self {
        Self {
            asset_id: asset_id(&hit.id),
            text: join_text([
                hit.tags.as_deref(),
                hit.kind.as_deref(),
                hit.user.as_deref(),
            ]),
            pixel_area: pixel_area(hit.image_width, hit.image_height),
            image_url: hit
                .large_image_url
                .filter(|url| !url.is_empty())
                .or(hit.webformat_url),
            photographer_name: hit.user,
            attribution_url: hit.page_url,
        }
    }
}

#[async_trait]
impl ImageProvider for PixabayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pixabay
    }

    async fn search(&self, profile: &QueryProfile) -> AppResult<Option<Candidate>> {
        let per_page = PAGE_SIZE.to_string();
        let response = self
            .http
            .get(format!("{}/api/", self.api_base))
            .query(&[
                ("key", self.api_key.expose_secret()),
                ("q", profile.query.as_str()),
                ("image_type", "photo"),
                ("orientation", "horizontal"),
                ("safesearch", "true"),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;
        debug!(query = %profile.query, hits = body.hits.len(), "pixabay search");
        let items = body.hits.into_iter().map(ResultItem::from).collect();
        Ok(pick_best(self.kind(), profile, items))
    }
}
