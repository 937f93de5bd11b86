use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::cache::CacheStore;
use crate::catalog::{resolve_region_name, OperatingSystem};
use crate::error::ServiceError;
use crate::models::{PricingRate, RateTable};
use crate::pricing::PRICING_CACHE_KEY;

/// Serves rate tables out of the merged pricing document.
#[derive(Debug, Clone)]
pub struct PricingQueryService {
    cache: CacheStore,
}

impl PricingQueryService {
    pub fn new(cache: CacheStore) -> Self {
        Self { cache }
    }

    /// `Ok(None)` when nothing matches; `Err(PricingDataMissing)` when no
    /// document was ever downloaded.
    pub fn rates_for(
        &self,
        region_code: &str,
        os: OperatingSystem,
    ) -> Result<Option<RateTable>, ServiceError> {
        // Served at any age: the refresh scheduler owns staleness for this entry.
        let document: Map<String, Value> =
            self.cache.get_any_age(PRICING_CACHE_KEY).ok_or_else(|| {
                error!(
                    "Pricing data file not found at {}",
                    self.cache.path(PRICING_CACHE_KEY).display()
                );
                ServiceError::PricingDataMissing
            })?;
        let region_name = resolve_region_name(region_code);
        debug!(
            "Looking up pricing for {} as '{}' across {} region codes",
            region_code,
            region_name,
            document.len()
        );
        let rates = find_region_rates(&document, region_name, os);
        match &rates {
            Some(table) => info!(
                "Found {} instance prices for {} ({})",
                table.len(),
                region_code,
                os
            ),
            None => info!("No pricing data found for {} ({})", region_code, os),
        }
        Ok(rates.filter(|table| !table.is_empty()))
    }
}

/// First region code whose `os` section lists `region_name` wins.
pub fn find_region_rates(
    document: &Map<String, Value>,
    region_name: &str,
    os: OperatingSystem,
) -> Option<RateTable> {
    document.iter().find_map(|(code, by_os)| {
        let instances = by_os
            .get(os.as_str())?
            .get("regions")?
            .get(region_name)?
            .as_object()?;
        debug!("Matched '{}' under region code {}", region_name, code);
        Some(build_rate_table(instances))
    })
}

fn build_rate_table(instances: &Map<String, Value>) -> RateTable {
    instances
        .values()
        .filter_map(|entry| {
            let instance_type = entry.get("Instance Type")?.as_str()?;
            let price = match entry.get("price")? {
                Value::String(price) => price.clone(),
                Value::Number(price) => price.to_string(),
                _ => return None,
            };
            Some((
                instance_type.to_string(),
                PricingRate::on_demand(instance_type, price),
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::scratch_dir;
    use crate::pricing::tests::region_body;
    use serde_json::json;
    use std::time::Duration;

    fn store_with(name: &str, document: Value) -> CacheStore {
        let cache = CacheStore::new(scratch_dir(name), Duration::from_secs(3600));
        assert!(cache.put(PRICING_CACHE_KEY, &document));
        cache
    }

    #[test]
    fn missing_document_is_a_hard_error() {
        let cache = CacheStore::new(scratch_dir("query_missing"), Duration::from_secs(3600));
        let service = PricingQueryService::new(cache);
        let err = service
            .rates_for("us-east-1", OperatingSystem::Linux)
            .unwrap_err();
        assert!(matches!(err, ServiceError::PricingDataMissing));
    }

    #[test]
    fn builds_rate_table_for_matching_region() {
        let document = json!({
            "us-east-1": {
                "Linux": region_body("US East (N. Virginia)", &[("t3.micro", "0.0104"), ("m5.large", "0.096")])
            }
        });
        let service = PricingQueryService::new(store_with("query_match", document));
        let rates = service
            .rates_for("us-east-1", OperatingSystem::Linux)
            .unwrap()
            .expect("rates");
        assert_eq!(rates.len(), 2);
        let micro = &rates["t3.micro"];
        assert_eq!(micro.price, "0.0104");
        assert_eq!(micro.unit, "Hrs");
        assert_eq!(
            micro.description.as_deref(),
            Some("On-demand price for t3.micro")
        );
    }

    #[test]
    fn absent_region_or_os_is_not_found() {
        let document = json!({
            "us-east-1": { "Linux": region_body("US East (N. Virginia)", &[("t3.micro", "0.0104")]) }
        });
        let service = PricingQueryService::new(store_with("query_absent", document));
        assert_eq!(
            service.rates_for("us-east-1", OperatingSystem::Windows).unwrap(),
            None
        );
        assert_eq!(
            service.rates_for("eu-west-1", OperatingSystem::Linux).unwrap(),
            None
        );
    }

    #[test]
    fn entries_without_type_or_price_are_skipped() {
        let document = json!({
            "us-east-1": { "Linux": { "regions": { "US East (N. Virginia)": {
                "a": { "Instance Type": "c5.large", "price": 0.085 },
                "b": { "price": "1.0" },
                "c": { "Instance Type": "r5.large" }
            }}}}
        });
        let service = PricingQueryService::new(store_with("query_skip", document));
        let rates = service
            .rates_for("us-east-1", OperatingSystem::Linux)
            .unwrap()
            .expect("rates");
        assert_eq!(rates.len(), 1);
        assert_eq!(rates["c5.large"].price, "0.085");
    }

    #[test]
    fn unknown_region_code_passes_through_and_first_match_wins() {
        let document = json!({
            "first": { "Linux": region_body("xx-new-1", &[("t3.micro", "1")]) },
            "second": { "Linux": region_body("xx-new-1", &[("t3.micro", "2")]) }
        });
        let service = PricingQueryService::new(store_with("query_first", document));
        let rates = service
            .rates_for("xx-new-1", OperatingSystem::Linux)
            .unwrap()
            .expect("rates");
        assert_eq!(rates["t3.micro"].price, "1");
    }

    #[test]
    fn empty_match_is_not_found() {
        let document = json!({
            "us-east-1": { "Linux": { "regions": { "US East (N. Virginia)": {} } } }
        });
        let service = PricingQueryService::new(store_with("query_empty", document));
        assert_eq!(
            service.rates_for("us-east-1", OperatingSystem::Linux).unwrap(),
            None
        );
    }
}
