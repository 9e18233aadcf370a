use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::catalog::Catalog;
use crate::errors::AppResult;
use crate::naming::{classify, Strictness};

const TOP_REASONS: usize = 20;
const TOP_SUFFIXES: usize = 30;
const TOP_COUNTRIES: usize = 100;
const FLAGGED_SAMPLES: usize = 400;

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
    pub summary: AuditSummary,
    pub top_reasons: Vec<(String, usize)>,
    pub top_suffixes: Vec<(String, usize)>,
    pub countries_by_flagged_ratio: Vec<CountryAudit>,
    pub flagged_samples: Vec<FlaggedPlace>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct AuditSummary {
    pub countries: usize,
    pub places: usize,
    pub flagged_places: usize,
    pub flagged_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountryAudit {
    pub country_code: String,
    pub country_name_en: String,
    pub total_places: usize,
    pub flagged_places: usize,
    pub flagged_ratio: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlaggedPlace {
    pub country_code: String,
    pub country_name_en: String,
    pub city: String,
    pub place_id: String,
    pub name_en: String,
    pub reason: String,
}

/// Occurrence counter that ranks by count and breaks ties by first appearance.
#[derive(Default)]
struct Tally {
    order: Vec<(String, usize)>,
    slots: HashMap<String, usize>,
}

impl Tally {
    fn add(&mut self, value: String) {
        match self.slots.get(&value) {
            Some(&slot) => self.order[slot].1 += 1,
            None => {
                self.slots.insert(value.clone(), self.order.len());
                self.order.push((value, 1));
            }
        }
    }

    fn most_common(mut self, limit: usize) -> Vec<(String, usize)> {
        self.order.sort_by(|a, b| b.1.cmp(&a.1));
        self.order.truncate(limit);
        self.order
    }
}

impl AuditReport {
    pub fn build(catalog: &Catalog) -> Self {
        let mut flagged = Vec::new();
        let mut reasons = Tally::default();
        let mut suffixes = Tally::default();
        let mut per_country: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut places = 0;

        for entry in catalog.entries() {
            places += 1;
            let code = entry.country.country_code.as_str();
            let stats = per_country.entry(code).or_default();
            stats.0 += 1;

            let verdict = classify(&entry.place.name_en, &entry.place.city, Strictness::Audit);
            if !verdict.is_synthetic() {
                continue;
            }
            stats.1 += 1;
            let reason = verdict.reason();
            reasons.add(reason.clone());
            suffixes.add(trailing_words(&entry.place.name_en));
            flagged.push(FlaggedPlace {
                country_code: entry.country.country_code.clone(),
                country_name_en: entry.country.country_name_en.clone(),
                city: entry.place.city.clone(),
                place_id: entry.place.place_id.clone(),
                name_en: entry.place.name_en.clone(),
                reason,
            });
        }

        let mut countries: Vec<CountryAudit> = catalog
            .countries
            .iter()
            .map(|country| {
                let (total, flagged) = per_country
                    .get(country.country_code.as_str())
                    .copied()
                    .unwrap_or_default();
                CountryAudit {
                    country_code: country.country_code.clone(),
                    country_name_en: country.country_name_en.clone(),
                    total_places: total,
                    flagged_places: flagged,
                    flagged_ratio: ratio(flagged, total.max(1)),
                }
            })
            .collect();
        countries.sort_by(|a, b| b.flagged_ratio.total_cmp(&a.flagged_ratio));
        countries.truncate(TOP_COUNTRIES);

        let summary = AuditSummary {
            countries: catalog.countries.len(),
            places,
            flagged_places: flagged.len(),
            flagged_ratio: if places == 0 {
                0.0
            } else {
                ratio(flagged.len(), places)
            },
        };
        flagged.truncate(FLAGGED_SAMPLES);

        Self {
            summary,
            top_reasons: reasons.most_common(TOP_REASONS),
            top_suffixes: suffixes.most_common(TOP_SUFFIXES),
            countries_by_flagged_ratio: countries,
            flagged_samples: flagged,
        }
    }

    pub fn persist(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(
            path = %path.display(),
            countries = self.summary.countries,
            places = self.summary.places,
            flagged = self.summary.flagged_places,
            ratio = self.summary.flagged_ratio,
            "audit written"
        );
        Ok(())
    }

    /// Writes the flagged samples as CSV with a header row.
    pub fn export_csv(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;
        for place in &self.flagged_samples {
            writer.serialize(place)?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    ((part as f64 / whole as f64) * 10_000.0).round() / 10_000.0
}

/// Last two whitespace-separated words of the lowercased name.
fn trailing_words(name: &str) -> String {
    let lowered = name.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.len() >= 2 {
        words[words.len() - 2..].join(" ")
    } else {
        lowered
    }
}
