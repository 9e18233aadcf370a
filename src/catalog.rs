use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

const STORAGE_PREFIX: &str = "images/placeholders";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub countries: Vec<Country>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Country {
    #[serde(default)]
    pub country_code: String,
    #[serde(default)]
    pub country_name_en: String,
    #[serde(default)]
    pub places: Vec<Place>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Place {
    #[serde(default)]
    pub place_id: String,
    #[serde(default)]
    pub name_en: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub tags_vector: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry<'a> {
    pub country: &'a Country,
    pub place: &'a Place,
}

impl<'a> CatalogEntry<'a> {
    pub fn storage_key(&self) -> String {
        storage_key(&self.country.country_code, &self.place.place_id)
    }
}

impl Catalog {
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(AppError::Catalog(format!(
                    "data file not found: {}",
                    path.display()
                )))
            }
            Err(err) => return Err(AppError::Io(err)),
        };
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Every place paired with its country, in document order.
    pub fn entries(&self) -> Vec<CatalogEntry<'_>> {
        self.countries
            .iter()
            .flat_map(|country| {
                country
                    .places
                    .iter()
                    .map(move |place| CatalogEntry { country, place })
            })
            .collect()
    }

    pub fn place_count(&self) -> usize {
        self.countries.iter().map(|c| c.places.len()).sum()
    }
}

impl Country {
    pub fn display_name(&self) -> &str {
        if self.country_name_en.trim().is_empty() {
            &self.country_code
        } else {
            &self.country_name_en
        }
    }
}

pub fn storage_key(country_code: &str, place_id: &str) -> String {
    format!("{STORAGE_PREFIX}/{country_code}/{place_id}.jpg")
}
