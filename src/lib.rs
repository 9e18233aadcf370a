pub mod audit;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod ledger;
pub mod naming;
pub mod placeholder;
pub mod providers;
pub mod query;
pub mod resolver;
pub mod scoring;

use std::time::Duration;

use once_cell::sync::OnceCell;
use reqwest::Client;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::audit::AuditReport;
pub use crate::backend::{BackendClient, BackendProcess, HttpImageSource, ImageSource, ObjectStore};
pub use crate::catalog::{Catalog, CatalogEntry, Country, Place};
pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::ingest::{IngestOptions, IngestRun, IngestSummary};
pub use crate::ledger::{JsonlLedger, LedgerRow, LedgerStatus, LedgerStore, MemoryLedger};
pub use crate::placeholder::{FrameRenderer, PlaceholderRenderer, PlaceholderRun};
pub use crate::providers::{build_providers, Candidate, ImageProvider, ProviderKind};
pub use crate::resolver::{ImageResolver, Resolution, CONFIDENCE_THRESHOLD};

const USER_AGENT: &str = concat!("place-image-ingest/", env!("CARGO_PKG_VERSION"));

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,place_image_ingest=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

/// Shared HTTP client for provider searches, downloads and backend calls.
pub fn http_client(config: &AppConfig) -> AppResult<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(config.http_timeout_secs))
        .build()?)
}
