use std::sync::Arc;

use futures::stream::{self, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::catalog::{Catalog, OperatingSystem};
use crate::error::FetchError;
use crate::fetch::JsonSource;
use crate::models::SlotOutcome;

pub const PRICING_CACHE_KEY: &str = "ec2_pricing.json";

pub const DEFAULT_PRICING_URL_TEMPLATE: &str = "https://b0.p.awsstatic.com/pricing/2.0/meteredUnitMaps/ec2/USD/current/ec2-ondemand-without-sec-sel/{region}/{os}/index.json";

// The pricing CDN expects exactly these escaped in region display names.
const REGION_NAME_ESCAPES: &AsciiSet = &CONTROLS.add(b' ').add(b'(').add(b')');

pub fn pricing_url(template: &str, region_name: &str, os: OperatingSystem) -> String {
    let region = utf8_percent_encode(region_name, REGION_NAME_ESCAPES).to_string();
    template
        .replace("{region}", &region)
        .replace("{os}", os.as_str())
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotReport {
    pub region_code: &'static str,
    pub os: OperatingSystem,
    pub outcome: SlotOutcome<()>,
}

/// Outcome of one full-catalog download.
#[derive(Debug, Clone, Serialize)]
pub struct PricingBatch {
    pub slots: Vec<SlotReport>,
    #[serde(skip)]
    pub document: Map<String, Value>,
    pub written: bool,
}

impl PricingBatch {
    pub fn fetched(&self) -> usize {
        self.slots.iter().filter(|slot| slot.outcome.is_fetched()).count()
    }

    pub fn failed(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.outcome, SlotOutcome::Failed(_)))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.outcome, SlotOutcome::Skipped(_)))
            .count()
    }
}

pub struct PricingFetcher {
    source: Arc<dyn JsonSource>,
    cache: CacheStore,
    catalog: Catalog,
    url_template: String,
    concurrency: usize,
}

impl PricingFetcher {
    pub fn new(
        source: Arc<dyn JsonSource>,
        cache: CacheStore,
        catalog: Catalog,
        url_template: String,
        concurrency: usize,
    ) -> Self {
        Self {
            source,
            cache,
            catalog,
            url_template,
            concurrency: concurrency.max(1),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Downloads every catalog slot and replaces the cached pricing document.
    pub async fn download_all(&self) -> PricingBatch {
        let slots = self.catalog.slots();
        info!(
            "Downloading pricing data for {} regions x {} operating systems",
            self.catalog.regions().len(),
            self.catalog.operating_systems().len()
        );

        let pending: Vec<_> = slots
            .into_iter()
            .map(|(code, name, os)| async move {
                let outcome = self.fetch_slot(code, name, os).await;
                (code, os, outcome)
            })
            .collect();
        // `buffered` keeps catalog order so the merged document does too.
        let results: Vec<_> = stream::iter(pending)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut document = Map::new();
        let mut reports = Vec::with_capacity(results.len());
        for (code, os, outcome) in results {
            let report_outcome = match outcome {
                SlotOutcome::Fetched(body) => {
                    let by_os = document
                        .entry(code.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(by_os) = by_os {
                        by_os.insert(os.as_str().to_string(), body);
                    }
                    SlotOutcome::Fetched(())
                }
                SlotOutcome::Failed(reason) => SlotOutcome::Failed(reason),
                SlotOutcome::Skipped(reason) => SlotOutcome::Skipped(reason),
            };
            reports.push(SlotReport {
                region_code: code,
                os,
                outcome: report_outcome,
            });
        }

        let mut batch = PricingBatch {
            slots: reports,
            document,
            written: false,
        };
        if batch.fetched() == 0 {
            error!(
                "Pricing download produced no data ({} failed, {} skipped); keeping existing cache",
                batch.failed(),
                batch.skipped()
            );
            return batch;
        }

        batch.written = self
            .cache
            .put(PRICING_CACHE_KEY, &Value::Object(batch.document.clone()));
        info!(
            "Pricing data saved to {}: {} fetched, {} failed, {} skipped",
            self.cache.path(PRICING_CACHE_KEY).display(),
            batch.fetched(),
            batch.failed(),
            batch.skipped()
        );
        batch
    }

    async fn fetch_slot(
        &self,
        code: &'static str,
        name: &'static str,
        os: OperatingSystem,
    ) -> SlotOutcome<Value> {
        let url = pricing_url(&self.url_template, name, os);
        info!("Downloading pricing data for {} ({})", code, os);
        match self.source.get_json(&url).await.and_then(validate_body) {
            Ok(body) => SlotOutcome::Fetched(body),
            Err(err) if err.is_not_published() => {
                warn!("No pricing published for {} ({}): {}", code, os, err);
                SlotOutcome::Skipped(err.to_string())
            }
            Err(err) => {
                error!(
                    "Failed to download pricing data for {} ({}): {}",
                    code, os, err
                );
                SlotOutcome::Failed(err.to_string())
            }
        }
    }
}

fn validate_body(body: Value) -> Result<Value, FetchError> {
    match body.get("regions") {
        Some(Value::Object(_)) => Ok(body),
        Some(_) => Err(FetchError::Malformed(
            "`regions` is not an object".to_string(),
        )),
        None => Err(FetchError::Malformed("missing `regions`".to_string())),
    }
}
