use std::path::PathBuf;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::providers::ProviderKind;

const DEFAULT_BACKEND_URL: &str = "http://localhost:8787";
const DEFAULT_BACKEND_COMMAND: &str = "node server.js";
const DEFAULT_PROVIDER_PRIORITY: &str = "unsplash,pexels,pixabay";
const DEFAULT_REQUEST_DELAY_MS: u64 = 180;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 45;

pub const DEFAULT_PIXABAY_API_BASE: &str = "https://pixabay.com";
pub const DEFAULT_PEXELS_API_BASE: &str = "https://api.pexels.com";
pub const DEFAULT_UNSPLASH_API_BASE: &str = "https://api.unsplash.com";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub backend_url: String,
    pub start_server: bool,
    pub backend_command: String,
    pub backend_workdir: PathBuf,
    pub max_places: usize,
    pub request_delay_ms: u64,
    pub provider_priority: Vec<String>,
    pub resume_from_manifest: bool,
    pub catalog_file: PathBuf,
    pub manifest_file: PathBuf,
    pub audit_output_file: PathBuf,
    pub http_timeout_secs: u64,
    pub pixabay_api_base: String,
    pub pexels_api_base: String,
    pub unsplash_api_base: String,
    pub pixabay_api_key: Option<SecretString>,
    pub pexels_api_key: Option<SecretString>,
    pub unsplash_access_key: Option<SecretString>,
    pub unsplash_secret_key: Option<SecretString>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub backend_url: String,
    pub start_server: bool,
    pub max_places: usize,
    pub request_delay_ms: u64,
    pub provider_priority: Vec<String>,
    pub resume_from_manifest: bool,
    pub catalog_file: String,
    pub manifest_file: String,
    pub has_pixabay_key: bool,
    pub has_pexels_key: bool,
    pub has_unsplash_key: bool,
    pub has_unsplash_secret: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv();
        Self {
            backend_url: env::var("BACKEND_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            start_server: parse_bool("START_SERVER", true),
            backend_command: env::var("BACKEND_COMMAND")
                .unwrap_or_else(|_| DEFAULT_BACKEND_COMMAND.to_string()),
            backend_workdir: parse_path("BACKEND_WORKDIR", "."),
            max_places: parse_usize("MAX_PLACES", 0),
            request_delay_ms: parse_u64("REQUEST_DELAY_MS", DEFAULT_REQUEST_DELAY_MS),
            provider_priority: parse_priority(
                &env::var("PROVIDER_PRIORITY")
                    .unwrap_or_else(|_| DEFAULT_PROVIDER_PRIORITY.to_string()),
            ),
            resume_from_manifest: parse_bool("RESUME_FROM_MANIFEST", true),
            catalog_file: parse_path("CATALOG_FILE", "data/countries.v1.json"),
            manifest_file: parse_path(
                "MANIFEST_FILE",
                "data/runtime/image_ingest_manifest.v1.jsonl",
            ),
            audit_output_file: parse_path(
                "AUDIT_OUTPUT_FILE",
                "data/runtime/place_catalog_audit.v1.json",
            ),
            http_timeout_secs: parse_u64("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS).max(1),
            pixabay_api_base: parse_base("PIXABAY_API_BASE", DEFAULT_PIXABAY_API_BASE),
            pexels_api_base: parse_base("PEXELS_API_BASE", DEFAULT_PEXELS_API_BASE),
            unsplash_api_base: parse_base("UNSPLASH_API_BASE", DEFAULT_UNSPLASH_API_BASE),
            pixabay_api_key: parse_secret(&["PIXABAY_API_KEY"]),
            pexels_api_key: parse_secret(&["PEXELS_API_KEY"]),
            unsplash_access_key: parse_secret(&[
                "UNSPLASH_ACCESS_KEY",
                "UNSPLASH_APPLICATION_ID",
                "UNSPLASH_APP_ID",
            ]),
            unsplash_secret_key: parse_secret(&["UNSPLASH_SECRET_KEY"]),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            backend_url: self.backend_url.clone(),
            start_server: self.start_server,
            max_places: self.max_places,
            request_delay_ms: self.request_delay_ms,
            provider_priority: self.provider_priority.clone(),
            resume_from_manifest: self.resume_from_manifest,
            catalog_file: self.catalog_file.to_string_lossy().to_string(),
            manifest_file: self.manifest_file.to_string_lossy().to_string(),
            has_pixabay_key: self.pixabay_api_key.is_some(),
            has_pexels_key: self.pexels_api_key.is_some(),
            has_unsplash_key: self.unsplash_access_key.is_some(),
            has_unsplash_secret: self.unsplash_secret_key.is_some(),
        }
    }

    pub fn api_key(&self, kind: ProviderKind) -> Option<&SecretString> {
        match kind {
            ProviderKind::Pixabay => self.pixabay_api_key.as_ref(),
            ProviderKind::Pexels => self.pexels_api_key.as_ref(),
            ProviderKind::Unsplash => self.unsplash_access_key.as_ref(),
        }
    }

    pub fn api_base(&self, kind: ProviderKind) -> &str {
        match kind {
            ProviderKind::Pixabay => &self.pixabay_api_base,
            ProviderKind::Pexels => &self.pexels_api_base,
            ProviderKind::Unsplash => &self.unsplash_api_base,
        }
    }

    pub fn has_any_provider_key(&self) -> bool {
        ProviderKind::ALL
            .iter()
            .any(|kind| self.api_key(*kind).is_some())
    }

    /// Providers from the priority list that carry a key, in priority order.
    pub fn enabled_providers(&self) -> Vec<ProviderKind> {
        let mut enabled = Vec::new();
        for name in &self.provider_priority {
            match ProviderKind::parse(name) {
                Some(kind) if self.api_key(kind).is_some() && !enabled.contains(&kind) => {
                    enabled.push(kind)
                }
                Some(_) => {}
                None => debug!(provider = %name, "ignoring unknown provider in priority list"),
            }
        }
        enabled
    }

    /// Configuration without any environment lookups, for tests.
    pub fn for_tests() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            start_server: false,
            backend_command: DEFAULT_BACKEND_COMMAND.to_string(),
            backend_workdir: PathBuf::from("."),
            max_places: 0,
            request_delay_ms: 0,
            provider_priority: parse_priority(DEFAULT_PROVIDER_PRIORITY),
            resume_from_manifest: true,
            catalog_file: PathBuf::from("data/countries.v1.json"),
            manifest_file: PathBuf::from("data/runtime/image_ingest_manifest.v1.jsonl"),
            audit_output_file: PathBuf::from("data/runtime/place_catalog_audit.v1.json"),
            http_timeout_secs: 5,
            pixabay_api_base: DEFAULT_PIXABAY_API_BASE.to_string(),
            pexels_api_base: DEFAULT_PEXELS_API_BASE.to_string(),
            unsplash_api_base: DEFAULT_UNSPLASH_API_BASE.to_string(),
            pixabay_api_key: None,
            pexels_api_key: None,
            unsplash_access_key: None,
            unsplash_secret_key: None,
        }
    }
}

fn load_dotenv() {
    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn parse_priority(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn parse_secret(keys: &[&str]) -> Option<SecretString> {
    keys.iter()
        .filter_map(|key| env::var(key).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
        .map(SecretString::from)
}

fn parse_base(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn parse_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}
