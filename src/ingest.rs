use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::backend::{ImageSource, ObjectStore};
use crate::catalog::CatalogEntry;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::ledger::{uploaded_keys, LedgerRow, LedgerStore, RowContext};
use crate::resolver::ImageResolver;

const PROGRESS_EVERY: usize = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
}

impl IngestSummary {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Zero means no cap.
    pub max_places: usize,
    pub resume: bool,
    pub place_delay: Duration,
}

impl IngestOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_places: config.max_places,
            resume: config.resume_from_manifest,
            place_delay: Duration::from_millis(config.request_delay_ms),
        }
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_places: 0,
            resume: true,
            place_delay: Duration::ZERO,
        }
    }
}

/// One pass over the catalog: resolve, download, upload and record each place.
pub struct IngestRun {
    resolver: ImageResolver,
    images: Arc<dyn ImageSource>,
    store: Arc<dyn ObjectStore>,
    ledger: Arc<dyn LedgerStore>,
    options: IngestOptions,
}

impl IngestRun {
    pub fn new(
        resolver: ImageResolver,
        images: Arc<dyn ImageSource>,
        store: Arc<dyn ObjectStore>,
        ledger: Arc<dyn LedgerStore>,
        options: IngestOptions,
    ) -> Self {
        Self {
            resolver,
            images,
            store,
            ledger,
            options,
        }
    }

    pub async fn execute(&self, entries: &[CatalogEntry<'_>]) -> AppResult<IngestSummary> {
        let entries = match self.options.max_places {
            0 => entries,
            cap => &entries[..cap.min(entries.len())],
        };

        let already_uploaded = if self.options.resume {
            let keys = uploaded_keys(&self.ledger.replay()?);
            if !keys.is_empty() {
                info!(keys = keys.len(), "resuming; already uploaded keys will be skipped");
            }
            keys
        } else {
            Default::default()
        };

        let mut summary = IngestSummary {
            total: entries.len(),
            ..IngestSummary::default()
        };
        info!(
            places = summary.total,
            providers = self.resolver.provider_count(),
            "ingest started"
        );
        let started = Instant::now();

        for (offset, entry) in entries.iter().enumerate() {
            let index = offset + 1;
            let key = entry.storage_key();
            if already_uploaded.contains(&key) {
                debug!(%key, "already uploaded");
                summary.skipped += 1;
                continue;
            }

            let ctx = RowContext {
                index,
                total: summary.total,
                country_code: entry.country.country_code.clone(),
                place_id: entry.place.place_id.clone(),
                place_name_en: entry.place.name_en.clone(),
                key,
            };
            let row = self.ingest_place(entry, &ctx).await;
            self.ledger.append(&row)?;
            if row.is_uploaded() {
                summary.success += 1;
            } else {
                summary.failed += 1;
            }

            if index % PROGRESS_EVERY == 0 || index == summary.total {
                info!(
                    progress = %format!("{index}/{}", summary.total),
                    success = summary.success,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    elapsed_secs = started.elapsed().as_secs(),
                    "ingest progress"
                );
            }

            if !self.options.place_delay.is_zero() {
                sleep(self.options.place_delay).await;
            }
        }

        info!(
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            "ingest finished"
        );
        Ok(summary)
    }

    async fn ingest_place(&self, entry: &CatalogEntry<'_>, ctx: &RowContext) -> LedgerRow {
        let resolution = self
            .resolver
            .resolve(entry.place, entry.country.display_name())
            .await;
        let Some(candidate) = resolution.best else {
            debug!(key = %ctx.key, attempts = resolution.attempts, "no candidate found");
            return LedgerRow::failed(ctx, resolution.errors);
        };

        let image = match self.images.download(&candidate.image_url).await {
            Ok(image) => image,
            Err(err) => {
                warn!(key = %ctx.key, url = %candidate.image_url, error = %err, "download failed");
                return LedgerRow::failed(ctx, vec![describe(&err)]);
            }
        };
        if !image.is_image() {
            return LedgerRow::failed(
                ctx,
                vec![format!(
                    "downloaded non-image content-type: {}",
                    image.content_type
                )],
            );
        }

        if let Err(err) = self
            .store
            .upload(&ctx.key, &image.content_type, &image.bytes)
            .await
        {
            warn!(key = %ctx.key, error = %err, "upload failed");
            return LedgerRow::failed(ctx, vec![describe(&err)]);
        }

        LedgerRow::uploaded(
            ctx,
            &candidate,
            image.bytes.len() as u64,
            &image.content_type,
        )
    }
}

fn describe(err: &AppError) -> String {
    format!("{}: {err}", err.diagnostic_label())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::backend::DownloadedImage;
    use crate::catalog::Catalog;
    use crate::ledger::{LedgerStatus, MemoryLedger};
    use crate::providers::{Candidate, ImageProvider, ProviderKind};
    use crate::query::QueryProfile;

    struct FixedProvider {
        score: Option<f64>,
        calls: Mutex<usize>,
    }

    impl FixedProvider {
        fn scoring(score: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                score,
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl ImageProvider for FixedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Pexels
        }

        async fn search(&self, profile: &QueryProfile) -> AppResult<Option<Candidate>> {
            *self.calls.lock() += 1;
            Ok(self.score.map(|match_score| Candidate {
                provider: ProviderKind::Pexels,
                provider_asset_id: "77".into(),
                image_url: "https://images.pexels/77.jpg".into(),
                photographer_name: Some("Kim".into()),
                attribution_url: Some("https://www.pexels.com/photo/77/".into()),
                license_label: ProviderKind::Pexels.license_label().into(),
                match_score,
                required_token_hits: 2,
                optional_token_hits: 0,
                query: profile.query.clone(),
                query_strategy: profile.strategy.to_string(),
            }))
        }
    }

    struct StubImages {
        content_type: &'static str,
    }

    #[async_trait]
    impl ImageSource for StubImages {
        async fn download(&self, _url: &str) -> AppResult<DownloadedImage> {
            Ok(DownloadedImage {
                content_type: self.content_type.into(),
                bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            })
        }
    }

    #[derive(Default)]
    struct RecordingStore {
        fail: bool,
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn upload(&self, key: &str, _content_type: &str, _bytes: &[u8]) -> AppResult<()> {
            if self.fail {
                return Err(AppError::Backend("bucket unavailable".into()));
            }
            self.keys.lock().push(key.to_string());
            Ok(())
        }
    }

    fn catalog() -> Catalog {
        Catalog::parse(
            r#"{"countries": [
                {"country_code": "KR", "country_name_en": "Korea", "places": [
                    {"place_id": "kr-1", "name_en": "Gyeongbokgung Palace", "city": "Seoul"},
                    {"place_id": "kr-2", "name_en": "Busan Old Town", "city": "Busan"}
                ]},
                {"country_code": "MN", "country_name_en": "Mongolia", "places": [
                    {"place_id": "mn-1", "name_en": "Kharkhorin Safari Reserve",
                     "city": "Kharkhorin"}
                ]}
            ]}"#,
        )
        .unwrap()
    }

    fn run(
        provider: Arc<FixedProvider>,
        content_type: &'static str,
        store: Arc<RecordingStore>,
        ledger: Arc<MemoryLedger>,
        options: IngestOptions,
    ) -> IngestRun {
        let resolver = ImageResolver::with_delay(
            vec![provider as Arc<dyn ImageProvider>],
            Duration::ZERO,
        );
        IngestRun::new(
            resolver,
            Arc::new(StubImages { content_type }),
            store,
            ledger,
            options,
        )
    }

    #[tokio::test]
    async fn uploads_every_place_and_records_rows() {
        let catalog = catalog();
        let store = Arc::new(RecordingStore::default());
        let ledger = Arc::new(MemoryLedger::default());
        let ingest = run(
            FixedProvider::scoring(Some(20.0)),
            "image/jpeg",
            store.clone(),
            ledger.clone(),
            IngestOptions::default(),
        );

        let summary = ingest.execute(&catalog.entries()).await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                success: 3,
                failed: 0,
                skipped: 0,
                total: 3
            }
        );
        assert_eq!(
            *store.keys.lock(),
            vec![
                "images/placeholders/KR/kr-1.jpg",
                "images/placeholders/KR/kr-2.jpg",
                "images/placeholders/MN/mn-1.jpg",
            ]
        );
        let rows = ledger.replay().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].index, 3);
        assert_eq!(rows[2].bytes, Some(4));
        assert_eq!(rows[2].provider.as_deref(), Some("pexels"));
        assert_eq!(rows[2].match_score, Some(20.0));
    }

    #[tokio::test]
    async fn resume_skips_uploaded_keys_without_searching() {
        let catalog = catalog();
        let entries = catalog.entries();
        let seeded = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let ctx = RowContext {
                    index: i + 1,
                    total: entries.len(),
                    country_code: entry.country.country_code.clone(),
                    place_id: entry.place.place_id.clone(),
                    place_name_en: entry.place.name_en.clone(),
                    key: entry.storage_key(),
                };
                LedgerRow {
                    status: LedgerStatus::Uploaded,
                    ..LedgerRow::failed(&ctx, Vec::new())
                }
            })
            .collect();
        let ledger = Arc::new(MemoryLedger::with_rows(seeded));
        let provider = FixedProvider::scoring(Some(20.0));
        let ingest = run(
            provider.clone(),
            "image/jpeg",
            Arc::new(RecordingStore::default()),
            ledger.clone(),
            IngestOptions::default(),
        );

        let summary = ingest.execute(&entries).await.unwrap();
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.success + summary.failed, 0);
        assert_eq!(*provider.calls.lock(), 0);
        assert_eq!(ledger.len(), 3);
    }

    #[tokio::test]
    async fn failures_are_recorded_and_counted() {
        let catalog = catalog();
        let ledger = Arc::new(MemoryLedger::default());
        let ingest = run(
            FixedProvider::scoring(Some(20.0)),
            "text/html; charset=utf-8",
            Arc::new(RecordingStore::default()),
            ledger.clone(),
            IngestOptions {
                max_places: 1,
                ..IngestOptions::default()
            },
        );

        let summary = ingest.execute(&catalog.entries()).await.unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.failed, 1);
        let rows = ledger.replay().unwrap();
        assert_eq!(rows[0].status, LedgerStatus::Failed);
        assert_eq!(
            rows[0].errors,
            vec!["downloaded non-image content-type: text/html; charset=utf-8"]
        );
        assert!(rows[0].provider.is_none());
    }

    #[tokio::test]
    async fn missing_candidates_and_upload_errors_fail_the_place() {
        let catalog = catalog();
        let entries = catalog.entries();

        let ledger = Arc::new(MemoryLedger::default());
        let ingest = run(
            FixedProvider::scoring(None),
            "image/jpeg",
            Arc::new(RecordingStore::default()),
            ledger.clone(),
            IngestOptions::default(),
        );
        let summary = ingest.execute(&entries[..1]).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert!(ledger.replay().unwrap()[0].errors.is_empty());

        let ledger = Arc::new(MemoryLedger::default());
        let ingest = run(
            FixedProvider::scoring(Some(13.0)),
            "image/png",
            Arc::new(RecordingStore {
                fail: true,
                ..RecordingStore::default()
            }),
            ledger.clone(),
            IngestOptions::default(),
        );
        let summary = ingest.execute(&entries[..1]).await.unwrap();
        assert!(summary.has_failures());
        assert_eq!(
            ledger.replay().unwrap()[0].errors,
            vec!["BackendError: storage backend error: bucket unavailable"]
        );
    }

    #[tokio::test]
    async fn no_resume_retries_uploaded_keys() {
        let catalog = catalog();
        let entries = catalog.entries();
        let ctx = RowContext {
            index: 1,
            total: 1,
            country_code: "KR".into(),
            place_id: "kr-1".into(),
            place_name_en: "Gyeongbokgung Palace".into(),
            key: entries[0].storage_key(),
        };
        let ledger = Arc::new(MemoryLedger::with_rows(vec![LedgerRow {
            status: LedgerStatus::Uploaded,
            ..LedgerRow::failed(&ctx, Vec::new())
        }]));
        let ingest = run(
            FixedProvider::scoring(Some(20.0)),
            "image/jpeg",
            Arc::new(RecordingStore::default()),
            ledger.clone(),
            IngestOptions {
                resume: false,
                ..IngestOptions::default()
            },
        );
        let summary = ingest.execute(&entries[..1]).await.unwrap();
        assert_eq!(summary.skipped, 0);
        assert_eq!(summary.success, 1);
        assert_eq!(ledger.len(), 2);
    }
}
