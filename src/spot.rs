use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::catalog::OperatingSystem;
use crate::error::ServiceError;
use crate::fetch::JsonSource;
use crate::models::SpotAdvisorDocument;

pub const SPOT_CACHE_KEY: &str = "spot_advisor_data.json";

pub const DEFAULT_SPOT_ADVISOR_URL: &str =
    "https://spot-bid-advisor.s3.amazonaws.com/spot-advisor-data.json";

pub struct SpotAdvisorService {
    source: Arc<dyn JsonSource>,
    cache: CacheStore,
    url: String,
}

impl SpotAdvisorService {
    pub fn new(source: Arc<dyn JsonSource>, cache: CacheStore, url: String) -> Self {
        Self { source, cache, url }
    }

    /// Serves the cached document while it is fresh, otherwise fetches,
    /// normalizes and caches a new one.
    pub async fn get(&self) -> Result<SpotAdvisorDocument, ServiceError> {
        if let Some(cached) = self.cache.get::<SpotAdvisorDocument>(SPOT_CACHE_KEY) {
            return Ok(cached);
        }

        info!("Fetching spot advisor data from {}", self.url);
        let raw = self.source.get_json(&self.url).await.map_err(|err| {
            error!("Failed to fetch spot data: {}", err);
            ServiceError::UpstreamUnavailable {
                what: "spot data",
                reason: err.to_string(),
            }
        })?;

        let document = normalize(&raw).map_err(|err| {
            error!("Data validation error: {}", err);
            err
        })?;
        if !self.cache.put(SPOT_CACHE_KEY, &document) {
            warn!("Serving spot advisor data without caching it");
        }
        Ok(document)
    }
}

/// Keeps `instance_types` and `ranges` as-is and narrows each region of
/// `spot_advisor` to the operating systems it actually carries.
pub fn reshape(raw: &Value) -> Value {
    let mut spot_advisor = Map::new();
    if let Some(regions) = raw.get("spot_advisor").and_then(Value::as_object) {
        for (region, region_data) in regions {
            let mut by_os = Map::new();
            for os in OperatingSystem::ALL {
                if let Some(section) = region_data.get(os.as_str()) {
                    by_os.insert(os.as_str().to_string(), section.clone());
                }
            }
            spot_advisor.insert(region.clone(), Value::Object(by_os));
        }
    }

    let mut document = Map::new();
    document.insert(
        "instance_types".to_string(),
        raw.get("instance_types")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    );
    document.insert(
        "ranges".to_string(),
        raw.get("ranges")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())),
    );
    document.insert("spot_advisor".to_string(), Value::Object(spot_advisor));
    Value::Object(document)
}

pub fn normalize(raw: &Value) -> Result<SpotAdvisorDocument, ServiceError> {
    let reshaped = reshape(raw);
    if let Some(region) = reshaped["spot_advisor"]
        .as_object()
        .and_then(|regions| regions.iter().find(|(_, data)| data.get("Linux").is_none()))
        .map(|(region, _)| region.clone())
    {
        return Err(ServiceError::MalformedData(format!(
            "region {} has no Linux data",
            region
        )));
    }
    serde_json::from_value(reshaped).map_err(|err| ServiceError::MalformedData(err.to_string()))
}
