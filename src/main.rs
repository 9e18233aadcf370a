use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reqwest::Client;
use tracing::{error, info, warn};

use place_image_ingest::placeholder::{verify_sample, DEFAULT_SAMPLE_NAME};
use place_image_ingest::{
    build_providers, http_client, init_tracing, AppConfig, AppError, AppResult, AuditReport,
    BackendClient, BackendProcess, Catalog, FrameRenderer, HttpImageSource, ImageResolver,
    IngestOptions, IngestRun, JsonlLedger, PlaceholderRun,
};

const INGEST_LAUNCH_TIMEOUT: Duration = Duration::from_secs(40);
const PLACEHOLDER_LAUNCH_TIMEOUT: Duration = Duration::from_secs(35);
const EXTERNAL_BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "place-image-ingest", version, about = "Place photo ingestion toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find, download and upload a photo for every catalog place
    Ingest {
        /// Process at most this many places (0 = all)
        #[arg(long)]
        max_places: Option<usize>,
        /// Ignore uploads recorded in the manifest
        #[arg(long)]
        no_resume: bool,
        /// Expect an already running backend
        #[arg(long)]
        no_start_server: bool,
    },
    /// Report catalog places with synthetic-looking names
    Audit {
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also export flagged places as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
    /// Upload generated placeholder images for every catalog place
    Placeholders {
        #[arg(long, default_value = DEFAULT_SAMPLE_NAME)]
        sample_name: String,
        #[arg(long)]
        no_start_server: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::from_env();

    let outcome = match cli.command {
        Command::Ingest {
            max_places,
            no_resume,
            no_start_server,
        } => run_ingest(config, max_places, no_resume, no_start_server).await,
        Command::Audit { output, csv } => run_audit(config, output, csv),
        Command::Placeholders {
            sample_name,
            no_start_server,
        } => run_placeholders(config, sample_name, no_start_server).await,
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!("run aborted: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_ingest(
    mut config: AppConfig,
    max_places: Option<usize>,
    no_resume: bool,
    no_start_server: bool,
) -> anyhow::Result<ExitCode> {
    if let Some(max_places) = max_places {
        config.max_places = max_places;
    }
    if no_resume {
        config.resume_from_manifest = false;
    }
    if no_start_server {
        config.start_server = false;
    }
    info!(config = ?config.public_profile(), "configuration loaded");

    let Some(catalog) = load_catalog(&config.catalog_file)? else {
        return Ok(ExitCode::from(1));
    };
    if !config.has_any_provider_key() {
        error!("no image provider API key configured");
        return Ok(ExitCode::from(2));
    }
    if config.unsplash_secret_key.is_some() {
        info!("unsplash secret key detected; search only needs the access key");
    }

    let http = http_client(&config)?;
    let providers = build_providers(&config, &http);
    info!(providers = ?config.enabled_providers(), "image providers enabled");

    let Some(session) = BackendSession::open(&config, &http, INGEST_LAUNCH_TIMEOUT).await? else {
        return Ok(ExitCode::from(3));
    };
    if !session.storage_configured().await? {
        session.close().await;
        return Ok(ExitCode::from(4));
    }

    let run = IngestRun::new(
        ImageResolver::new(providers, &config),
        Arc::new(HttpImageSource::new(http.clone())),
        Arc::new(session.client.clone()),
        Arc::new(JsonlLedger::new(config.manifest_file.clone())),
        IngestOptions::from_config(&config),
    );
    let outcome = run.execute(&catalog.entries()).await;
    session.close().await;
    let summary = outcome.with_context(|| {
        format!("recording to manifest {}", config.manifest_file.display())
    })?;

    info!(
        success = summary.success,
        failed = summary.failed,
        skipped = summary.skipped,
        manifest = %config.manifest_file.display(),
        "ingest result"
    );
    Ok(if summary.has_failures() {
        ExitCode::from(5)
    } else {
        ExitCode::SUCCESS
    })
}

fn run_audit(
    config: AppConfig,
    output: Option<PathBuf>,
    csv: Option<PathBuf>,
) -> anyhow::Result<ExitCode> {
    let Some(catalog) = load_catalog(&config.catalog_file)? else {
        return Ok(ExitCode::from(1));
    };
    let report = AuditReport::build(&catalog);
    let output = output.unwrap_or(config.audit_output_file);
    report
        .persist(&output)
        .with_context(|| format!("writing audit report to {}", output.display()))?;
    if let Some(csv) = csv {
        report
            .export_csv(&csv)
            .with_context(|| format!("exporting flagged places to {}", csv.display()))?;
        info!(
            path = %csv.display(),
            rows = report.flagged_samples.len(),
            "flagged places exported"
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_placeholders(
    mut config: AppConfig,
    sample_name: String,
    no_start_server: bool,
) -> anyhow::Result<ExitCode> {
    if no_start_server {
        config.start_server = false;
    }
    let Some(catalog) = load_catalog(&config.catalog_file)? else {
        return Ok(ExitCode::from(1));
    };

    let http = http_client(&config)?;
    let Some(session) = BackendSession::open(&config, &http, PLACEHOLDER_LAUNCH_TIMEOUT).await?
    else {
        return Ok(ExitCode::from(2));
    };
    if !session.storage_configured().await? {
        session.close().await;
        return Ok(ExitCode::from(3));
    }

    let run = PlaceholderRun::new(
        Arc::new(FrameRenderer),
        Arc::new(session.client.clone()),
        sample_name.clone(),
    );
    let summary = match run.execute(&catalog).await {
        Ok(summary) => summary,
        Err(err) => {
            session.close().await;
            return Err(err.into());
        }
    };

    let Some(sample_key) = summary.sample_key.as_deref() else {
        error!(sample = %sample_name, "sample place not found in catalog");
        session.close().await;
        return Ok(ExitCode::from(4));
    };
    let check = verify_sample(&session.client, &HttpImageSource::new(http), sample_key).await;
    session.close().await;
    let check = check.context("verifying sample placeholder")?;

    info!(
        success = summary.success,
        failed = summary.failed,
        sample_key = %check.key,
        public_url = ?check.public_url,
        signed_url_ok = check.signed_url.is_some(),
        signed_content_type = ?check.signed_content_type,
        signed_content_length = ?check.signed_content_length,
        list_preview_count = check.list_preview_count,
        "placeholder result"
    );
    Ok(if summary.failed > 0 {
        ExitCode::from(5)
    } else {
        ExitCode::SUCCESS
    })
}

/// `None` when the catalog file does not exist.
fn load_catalog(path: &Path) -> AppResult<Option<Catalog>> {
    match Catalog::load(path) {
        Ok(catalog) => {
            info!(
                path = %path.display(),
                countries = catalog.countries.len(),
                places = catalog.place_count(),
                "catalog loaded"
            );
            Ok(Some(catalog))
        }
        Err(AppError::Catalog(message)) => {
            error!("{message}");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

/// Healthy backend connection, plus the server process when this run launched it.
struct BackendSession {
    client: BackendClient,
    process: Option<BackendProcess>,
}

impl BackendSession {
    /// `None` when the backend never reports healthy.
    async fn open(
        config: &AppConfig,
        http: &Client,
        launch_timeout: Duration,
    ) -> AppResult<Option<Self>> {
        let client = BackendClient::new(http.clone(), config.backend_url.clone());
        let (process, timeout) = if config.start_server {
            let process = BackendProcess::spawn(&config.backend_command, &config.backend_workdir)?;
            (Some(process), launch_timeout)
        } else {
            (None, EXTERNAL_BACKEND_TIMEOUT)
        };

        if !client.wait_for_health(timeout).await {
            error!(url = %config.backend_url, "backend health check failed");
            if let Some(process) = process {
                process.shutdown().await;
            }
            return Ok(None);
        }
        Ok(Some(Self { client, process }))
    }

    async fn storage_configured(&self) -> AppResult<bool> {
        let status = self.client.storage_status().await?;
        if status.configured {
            info!(bucket = %status.bucket, endpoint = %status.endpoint, "object storage ready");
        } else {
            warn!("object storage is not configured in backend");
        }
        Ok(status.configured)
    }

    async fn close(self) {
        if let Some(process) = self.process {
            process.shutdown().await;
        }
    }
}
