use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
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

pub struct PexelsProvider {
    http: Client,
    api_base: String,
    api_key: SecretString,
}

impl PexelsProvider {
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
    photos: Vec<Photo>,
}

#[derive(Deserialize)]
struct Photo {
    #[serde(default)]
    id: serde_json::Value,
    width: Option<u64>,
    height: Option<u64>,
    url: Option<String>,
    photographer: Option<String>,
    alt: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    src: PhotoSources,
}

#[derive(Deserialize, Default)]
struct PhotoSources {
    large2x: Option<String>,
    large: Option<String>,
    original: Option<String>,
}

impl From<Photo> for ResultItem {
    fn from(photo: Photo) -> Self {
        let PhotoSources {
            large2x,
            large,
            original,
        } = photo.src;
        Self {
            asset_id: asset_id(&photo.id),
            text: join_text([photo.alt.as_deref(), photo.photographer.as_deref()]),
            pixel_area: pixel_area(photo.width, photo.height),
            image_url: [large2x, large, original]
                .into_iter()
                .flatten()
                .find(|url| !url.is_empty()),
            photographer_name: photo.photographer,
            attribution_url: photo.url,
        }
    }
}

#[async_trait]
impl ImageProvider for PexelsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pexels
    }

    async fn search(&self, profile: &QueryProfile) -> AppResult<Option<Candidate>> {
        let per_page = PAGE_SIZE.to_string();
        let response = self
            .http
            .get(format!("{}/v1/search", self.api_base))
            .header(AUTHORIZATION, self.api_key.expose_secret())
            .query(&[
                ("query", profile.query.as_str()),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;
        debug!(query = %profile.query, photos = body.photos.len(), "pexels search");
        let items = body.photos.into_iter().map(ResultItem::from).collect();
        Ok(pick_best(self.kind(), profile, items))
    }
}
