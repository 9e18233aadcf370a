use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::catalog::Place;
use crate::config::AppConfig;
use crate::providers::{Candidate, ImageProvider};
use crate::query::build_query_profiles;

pub const CONFIDENCE_THRESHOLD: f64 = 12.0;

#[derive(Debug, Default)]
pub struct Resolution {
    pub best: Option<Candidate>,
    pub errors: Vec<String>,
    pub attempts: usize,
}

/// Walks providers × query profiles in priority order and keeps the best candidate.
pub struct ImageResolver {
    providers: Vec<Arc<dyn ImageProvider>>,
    attempt_delay: Duration,
    threshold: f64,
}

impl ImageResolver {
    pub fn new(providers: Vec<Arc<dyn ImageProvider>>, config: &AppConfig) -> Self {
        Self::with_delay(providers, Duration::from_millis(config.request_delay_ms))
    }

    pub fn with_delay(providers: Vec<Arc<dyn ImageProvider>>, attempt_delay: Duration) -> Self {
        Self {
            providers,
            attempt_delay,
            threshold: CONFIDENCE_THRESHOLD,
        }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn resolve(&self, place: &Place, country_name: &str) -> Resolution {
        let profiles = build_query_profiles(place, country_name);
        let mut resolution = Resolution::default();

        for provider in &self.providers {
            for profile in &profiles {
                resolution.attempts += 1;
                match provider.search(profile).await {
                    Ok(Some(candidate)) => {
                        debug!(
                            provider = %provider.kind(),
                            query = %profile.query,
                            score = candidate.match_score,
                            "candidate found"
                        );
                        let improves = resolution
                            .best
                            .as_ref()
                            .map(|best| candidate.match_score > best.match_score)
                            .unwrap_or(true);
                        if improves {
                            resolution.best = Some(candidate);
                        }
                        if resolution
                            .best
                            .as_ref()
                            .is_some_and(|best| best.match_score >= self.threshold)
                        {
                            return resolution;
                        }
                    }
                    Ok(None) => {
                        debug!(provider = %provider.kind(), query = %profile.query, "no results");
                    }
                    Err(err) => {
                        warn!(
                            provider = %provider.kind(),
                            query = %profile.query,
                            error = %err,
                            "provider search failed"
                        );
                        resolution.errors.push(format!(
                            "{}:{}:{}",
                            provider.kind(),
                            profile.query,
                            err.diagnostic_label()
                        ));
                    }
                }
                if !self.attempt_delay.is_zero() {
                    sleep(self.attempt_delay).await;
                }
            }
        }

        resolution
    }
}
