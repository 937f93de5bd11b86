use std::time::Duration;

use tracing::{error, info};

use crate::cache::CacheStore;
use crate::pricing::{PricingBatch, PricingFetcher, PRICING_CACHE_KEY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Missing,
    Stale { age: Duration },
    Fresh { age: Duration },
}

impl RefreshDecision {
    pub fn needs_download(&self) -> bool {
        !matches!(self, RefreshDecision::Fresh { .. })
    }
}

pub fn evaluate(cache: &CacheStore) -> RefreshDecision {
    match cache.age(PRICING_CACHE_KEY) {
        None => RefreshDecision::Missing,
        Some(age) if cache.is_expired(age) => RefreshDecision::Stale { age },
        Some(age) => RefreshDecision::Fresh { age },
    }
}

/// Startup check: re-downloads pricing when the cached document is absent
/// or stale. Never fails; a bad refresh leaves whatever cache exists.
pub async fn refresh_pricing(fetcher: &PricingFetcher, force: bool) -> Option<PricingBatch> {
    let decision = evaluate(fetcher.cache());
    match decision {
        RefreshDecision::Fresh { age } if !force => {
            info!(
                "Reusing cached pricing data ({:.1}h old)",
                age.as_secs_f64() / 3600.0
            );
            return None;
        }
        RefreshDecision::Missing => info!("No cached pricing data; downloading"),
        RefreshDecision::Stale { age } => info!(
            "Cached pricing data is {:.1}h old; downloading",
            age.as_secs_f64() / 3600.0
        ),
        RefreshDecision::Fresh { .. } => info!("Forced pricing refresh"),
    }

    let batch = fetcher.download_all().await;
    if batch.written {
        info!("Successfully downloaded EC2 pricing data");
    } else {
        error!("Failed to download EC2 pricing data");
    }
    Some(batch)
}
