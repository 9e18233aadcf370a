use std::sync::Arc;
use std::time::Instant;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, Rgb, RgbImage};
use serde::Serialize;
use tracing::{info, warn};

use crate::backend::{BackendClient, ImageSource, ObjectStore};
use crate::catalog::{storage_key, Catalog, Country, Place};
use crate::errors::AppResult;

pub const DEFAULT_SAMPLE_NAME: &str = "Kharkhorin Safari Reserve";
pub const PLACEHOLDER_CONTENT_TYPE: &str = "image/jpeg";

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const JPEG_QUALITY: u8 = 86;
const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const YELLOW: Rgb<u8> = Rgb([247, 214, 87]);
const YELLOW_DIM: Rgb<u8> = Rgb([212, 176, 57]);
const FRAME_INNER: Rgb<u8> = Rgb([80, 70, 30]);
const PROGRESS_EVERY_COUNTRIES: usize = 10;
const SAMPLE_LIST_PREFIX: &str = "images/placeholders/";
const SAMPLE_LIST_LIMIT: usize = 20;
const SIGNED_URL_EXPIRES_SECS: u64 = 600;

/// Produces the JPEG stand-in for a place without a real photo.
pub trait PlaceholderRenderer: Send + Sync {
    fn render(&self, place: &Place, country: &Country) -> AppResult<Vec<u8>>;
}

/// Black card with the double yellow frame and a country accent bar.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameRenderer;

impl FrameRenderer {
    pub fn canvas(&self, country: &Country) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
        draw_outline(&mut canvas, 24, 4, YELLOW_DIM);
        draw_outline(&mut canvas, 46, 2, FRAME_INNER);
        fill_rect(&mut canvas, 90, 600, accent_length(&country.country_code), 10, YELLOW);
        canvas
    }
}

impl PlaceholderRenderer for FrameRenderer {
    fn render(&self, _place: &Place, country: &Country) -> AppResult<Vec<u8>> {
        let canvas = self.canvas(country);
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, JPEG_QUALITY)
            .encode_image(&DynamicImage::ImageRgb8(canvas))?;
        Ok(encoded)
    }
}

/// Rectangle outline `inset` pixels from every edge, `thickness` pixels wide, drawn inward.
fn draw_outline(canvas: &mut RgbImage, inset: u32, thickness: u32, color: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for step in 0..thickness {
        let left = inset + step;
        let top = inset + step;
        let right = width.saturating_sub(inset + step).min(width - 1);
        let bottom = height.saturating_sub(inset + step).min(height - 1);
        if left > right || top > bottom {
            return;
        }
        for x in left..=right {
            canvas.put_pixel(x, top, color);
            canvas.put_pixel(x, bottom, color);
        }
        for y in top..=bottom {
            canvas.put_pixel(left, y, color);
            canvas.put_pixel(right, y, color);
        }
    }
}

fn fill_rect(canvas: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let x_end = (x + width).min(canvas.width());
    let y_end = (y + height).min(canvas.height());
    for py in y..y_end {
        for px in x..x_end {
            canvas.put_pixel(px, py, color);
        }
    }
}

fn accent_length(country_code: &str) -> u32 {
    let seed: u32 = country_code.bytes().map(u32::from).sum();
    160 + seed % 480
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaceholderSummary {
    pub success: usize,
    pub failed: usize,
    pub sample_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleCheck {
    pub key: String,
    pub list_preview_count: usize,
    pub public_url: Option<String>,
    pub signed_url: Option<String>,
    pub signed_content_type: Option<String>,
    pub signed_content_length: Option<usize>,
}

/// Renders and uploads a placeholder for every catalog place.
pub struct PlaceholderRun {
    renderer: Arc<dyn PlaceholderRenderer>,
    store: Arc<dyn ObjectStore>,
    sample_name: String,
}

impl PlaceholderRun {
    pub fn new(
        renderer: Arc<dyn PlaceholderRenderer>,
        store: Arc<dyn ObjectStore>,
        sample_name: impl Into<String>,
    ) -> Self {
        Self {
            renderer,
            store,
            sample_name: sample_name.into(),
        }
    }

    /// Upload failures are counted and logged; only rendering errors abort the run.
    pub async fn execute(&self, catalog: &Catalog) -> AppResult<PlaceholderSummary> {
        let mut summary = PlaceholderSummary::default();
        let started = Instant::now();
        info!(
            countries = catalog.countries.len(),
            places = catalog.place_count(),
            "placeholder upload started"
        );

        for (index, country) in catalog.countries.iter().enumerate() {
            for place in &country.places {
                let key = storage_key(&country.country_code, &place.place_id);
                let jpeg = self.renderer.render(place, country)?;
                match self.store.upload(&key, PLACEHOLDER_CONTENT_TYPE, &jpeg).await {
                    Ok(()) => summary.success += 1,
                    Err(err) => {
                        summary.failed += 1;
                        warn!(%key, error = %err, "placeholder upload failed");
                    }
                }
                if place.name_en == self.sample_name {
                    summary.sample_key = Some(key);
                }
            }

            let done = index + 1;
            if done % PROGRESS_EVERY_COUNTRIES == 0 {
                info!(
                    progress = %format!("{done}/{}", catalog.countries.len()),
                    success = summary.success,
                    failed = summary.failed,
                    elapsed_secs = started.elapsed().as_secs(),
                    "placeholder progress"
                );
            }
        }

        Ok(summary)
    }
}

/// Confirms the sample object is listed and reachable through a signed URL.
pub async fn verify_sample(
    backend: &BackendClient,
    images: &dyn ImageSource,
    key: &str,
) -> AppResult<SampleCheck> {
    let listed = backend
        .list_objects(SAMPLE_LIST_PREFIX, SAMPLE_LIST_LIMIT)
        .await?;
    let public_url = backend.public_url(key).await?;
    let signed_url = backend.signed_url(key, SIGNED_URL_EXPIRES_SECS).await?;

    let (signed_content_type, signed_content_length) = match signed_url.as_deref() {
        Some(url) => {
            let fetched = images.download(url).await?;
            (Some(fetched.content_type), Some(fetched.bytes.len()))
        }
        None => (None, None),
    };

    Ok(SampleCheck {
        key: key.to_string(),
        list_preview_count: listed.len(),
        public_url,
        signed_url,
        signed_content_type,
        signed_content_length,
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use httptest::matchers::{all_of, contains, request, url_decoded};
    use httptest::responders::{json_encoded, status_code};
    use httptest::{Expectation, Server};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::backend::HttpImageSource;
    use crate::errors::AppError;

    #[derive(Default)]
    struct FlakyStore {
        reject: Option<&'static str>,
        uploads: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl ObjectStore for FlakyStore {
        async fn upload(&self, key: &str, content_type: &str, bytes: &[u8]) -> AppResult<()> {
            if self.reject == Some(key) {
                return Err(AppError::Backend("rejected".into()));
            }
            self.uploads
                .lock()
                .push((key.to_string(), content_type.to_string(), bytes.len()));
            Ok(())
        }
    }

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"{"countries": [
                {"country_code": "MN", "country_name_en": "Mongolia", "places": [
                    {"place_id": "mn-1", "name_en": "Kharkhorin Safari Reserve",
                     "city": "Kharkhorin"},
                    {"place_id": "mn-2", "name_en": "Gandan Monastery", "city": "Ulaanbaatar"}
                ]},
                {"country_code": "KR", "country_name_en": "Korea", "places": [
                    {"place_id": "kr-1", "name_en": "Gyeongbokgung Palace", "city": "Seoul"}
                ]}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn renders_framed_jpeg_at_full_size() {
        let catalog = catalog();
        let country = &catalog.countries[0];
        let renderer = FrameRenderer;

        let canvas = renderer.canvas(country);
        assert_eq!(canvas.get_pixel(0, 0), &BACKGROUND);
        assert_eq!(canvas.get_pixel(24, 24), &YELLOW_DIM);
        assert_eq!(canvas.get_pixel(27, 360), &YELLOW_DIM);
        assert_eq!(canvas.get_pixel(28, 360), &BACKGROUND);
        assert_eq!(canvas.get_pixel(WIDTH - 24, 100), &YELLOW_DIM);
        assert_eq!(canvas.get_pixel(46, 46), &FRAME_INNER);
        assert_eq!(canvas.get_pixel(90, 600), &YELLOW);

        let jpeg = renderer.render(&country.places[0], country).unwrap();
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (WIDTH, HEIGHT));
    }

    #[tokio::test]
    async fn uploads_every_place_and_finds_sample() {
        let store = Arc::new(FlakyStore {
            reject: Some("images/placeholders/KR/kr-1.jpg"),
            ..FlakyStore::default()
        });
        let run = PlaceholderRun::new(Arc::new(FrameRenderer), store.clone(), DEFAULT_SAMPLE_NAME);

        let summary = run.execute(&catalog()).await.unwrap();
        assert_eq!(summary.success, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(
            summary.sample_key.as_deref(),
            Some("images/placeholders/MN/mn-1.jpg")
        );
        let uploads = store.uploads.lock();
        assert_eq!(uploads[0].0, "images/placeholders/MN/mn-1.jpg");
        assert_eq!(uploads[0].1, "image/jpeg");
        assert!(uploads[0].2 > 0);
    }

    #[tokio::test]
    async fn missing_sample_leaves_key_empty() {
        let run = PlaceholderRun::new(
            Arc::new(FrameRenderer),
            Arc::new(FlakyStore::default()),
            "Nowhere In Particular",
        );
        let summary = run.execute(&catalog()).await.unwrap();
        assert_eq!(summary.success, 3);
        assert!(summary.sample_key.is_none());
    }

    #[tokio::test]
    async fn verifies_sample_through_backend_lookups() {
        let server = Server::run();
        let key = "images/placeholders/MN/mn-1.jpg";
        let signed = server.url("/signed/mn-1.jpg").to_string();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/r2/list")).respond_with(
                json_encoded(json!({
                    "objects": [{ "key": key }, { "key": "images/placeholders/MN/mn-2.jpg" }]
                })),
            ),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/r2/public-url"),
                request::query(url_decoded(contains(("key", key)))),
            ])
            .respond_with(json_encoded(json!({
                "key": key,
                "url": "https://cdn.example/mn-1.jpg"
            }))),
        );
        server.expect(
            Expectation::matching(all_of![
                request::method_path("GET", "/api/r2/signed-url"),
                request::query(url_decoded(contains(("expires", "600")))),
            ])
            .respond_with(json_encoded(json!({ "key": key, "url": signed }))),
        );
        server.expect(
            Expectation::matching(request::method_path("GET", "/signed/mn-1.jpg")).respond_with(
                status_code(200)
                    .append_header("content-type", "image/jpeg")
                    .body(vec![0_u8; 128]),
            ),
        );

        let http = reqwest::Client::new();
        let backend = BackendClient::new(http.clone(), server.url("/").to_string());
        let check = verify_sample(&backend, &HttpImageSource::new(http), key)
            .await
            .unwrap();
        assert_eq!(check.list_preview_count, 2);
        assert_eq!(check.public_url.as_deref(), Some("https://cdn.example/mn-1.jpg"));
        assert_eq!(check.signed_content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(check.signed_content_length, Some(128));
    }
}
