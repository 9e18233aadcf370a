use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Config(String),
    #[error("catalog error: {0}")]
    Catalog(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("provider error: {0}")]
    Provider(String),
}

impl AppError {
    /// Short token naming the failure class, e.g. `HTTP429` or `Timeout`.
    pub fn diagnostic_label(&self) -> String {
        match self {
            AppError::Http(err) => {
                if let Some(status) = err.status() {
                    format!("HTTP{}", status.as_u16())
                } else if err.is_timeout() {
                    "Timeout".into()
                } else if err.is_connect() {
                    "ConnectError".into()
                } else if err.is_decode() {
                    "DecodeError".into()
                } else {
                    "RequestError".into()
                }
            }
            AppError::Io(_) => "IoError".into(),
            AppError::Json(_) => "JsonError".into(),
            AppError::Image(_) => "ImageError".into(),
            AppError::Csv(_) => "CsvError".into(),
            AppError::Config(_) => "ConfigError".into(),
            AppError::Catalog(_) => "CatalogError".into(),
            AppError::Backend(_) => "BackendError".into(),
            AppError::Provider(_) => "ProviderError".into(),
        }
    }
}
