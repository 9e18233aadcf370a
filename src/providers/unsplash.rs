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

pub struct UnsplashProvider {
    http: Client,
    api_base: String,
    access_key: SecretString,
}

impl UnsplashProvider {
    pub fn new(http: Client, api_base: String, access_key: SecretString) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_key,
        }
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    results: Vec<Photo>,
}

#[derive(Deserialize)]
struct Photo {
    #[serde(default)]
    id: serde_json::Value,
    width: Option<u64>,
    height: Option<u64>,
    alt_description: Option<String>,
    description: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    urls: PhotoUrls,
    #[serde(default, deserialize_with = "null_as_default")]
    user: PhotoUser,
    #[serde(default, deserialize_with = "null_as_default")]
    links: PhotoLinks,
    #[serde(default, deserialize_with = "null_as_default")]
    location: PhotoLocation,
    #[serde(default, deserialize_with = "null_as_default")]
    tags: Vec<PhotoTag>,
}

#[derive(Deserialize, Default)]
struct PhotoUrls {
    regular: Option<String>,
    full: Option<String>,
}

#[derive(Deserialize, Default)]
struct PhotoUser {
    name: Option<String>,
}

#[derive(Deserialize, Default)]
struct PhotoLinks {
    html: Option<String>,
}

#[derive(Deserialize, Default)]
struct PhotoLocation {
    city: Option<String>,
    country: Option<String>,
}

/// Search results carry tags either as `{ "title": ... }` objects or bare strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum PhotoTag {
    Titled { title: Option<String> },
    Plain(String),
    Other(serde_json::Value),
}

impl PhotoTag {
    fn title(&self) -> &str {
        match self {
            PhotoTag::Titled { title } => title.as_deref().unwrap_or(""),
            PhotoTag::Plain(value) => value,
            PhotoTag::Other(_) => "",
        }
    }
}

impl From<Photo> for ResultItem {
    fn from(photo: Photo) -> Self {
        let tag_titles = photo
            .tags
            .iter()
            .map(PhotoTag::title)
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            asset_id: asset_id(&photo.id),
            text: join_text([
                photo.alt_description.as_deref(),
                photo.description.as_deref(),
                photo.location.city.as_deref(),
                photo.location.country.as_deref(),
                Some(tag_titles.as_str()),
            ]),
            pixel_area: pixel_area(photo.width, photo.height),
            image_url: [photo.urls.regular, photo.urls.full]
                .into_iter()
                .flatten()
                .find(|url| !url.is_empty()),
            photographer_name: photo.user.name,
            attribution_url: photo.links.html,
        }
    }
}

#[async_trait]
impl ImageProvider for UnsplashProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Unsplash
    }

    async fn search(&self, profile: &QueryProfile) -> AppResult<Option<Candidate>> {
        let per_page = PAGE_SIZE.to_string();
        let response = self
            .http
            .get(format!("{}/search/photos", self.api_base))
            .query(&[
                ("query", profile.query.as_str()),
                ("per_page", per_page.as_str()),
                ("orientation", "landscape"),
                ("content_filter", "high"),
                ("client_id", self.access_key.expose_secret()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: SearchResponse = response.json().await?;
        debug!(query = %profile.query, results = body.results.len(), "unsplash search");
        let items = body.results.into_iter().map(ResultItem::from).collect();
        Ok(pick_best(self.kind(), profile, items))
    }
}
