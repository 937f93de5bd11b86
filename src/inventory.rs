use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info};

use crate::catalog::is_region_code;
use crate::models::{
    AwsCredentials, InventoryByRegion, InventoryRecord, RegionInventorySummary, SlotOutcome,
};

/// Lists the compute instances visible to `credentials` in one region.
#[async_trait]
pub trait InstanceLister: Send + Sync {
    async fn list_instances(
        &self,
        credentials: &AwsCredentials,
        region: &str,
    ) -> Result<Vec<InventoryRecord>>;
}

pub struct InventoryService {
    lister: Arc<dyn InstanceLister>,
}

impl InventoryService {
    pub fn new(lister: Arc<dyn InstanceLister>) -> Self {
        Self { lister }
    }

    /// One outcome per requested region, in request order.
    pub async fn list_by_region(
        &self,
        credentials: &AwsCredentials,
    ) -> Vec<(String, SlotOutcome<Vec<InventoryRecord>>)> {
        let mut regions: Vec<&str> = Vec::new();
        for region in &credentials.regions {
            let region = region.trim();
            if !region.is_empty() && !regions.contains(&region) {
                regions.push(region);
            }
        }

        let listings = regions.iter().map(|region| async move {
            if !is_region_code(region) {
                error!("Rejecting invalid region code {:?}", region);
                let reason = format!("Invalid region code: {}", region);
                return (region.to_string(), SlotOutcome::Failed(reason));
            }
            let outcome = match self.lister.list_instances(credentials, region).await {
                Ok(records) => {
                    let live: Vec<_> = records
                        .into_iter()
                        .filter(|record| !record.is_terminated())
                        .collect();
                    info!("Retrieved {} instances from region {}", live.len(), region);
                    SlotOutcome::Fetched(live)
                }
                Err(err) => {
                    error!("Error fetching instances from region {}: {:#}", region, err);
                    SlotOutcome::Failed(format!("{:#}", err))
                }
            };
            (region.to_string(), outcome)
        });
        join_all(listings).await
    }

    /// Instances per region; regions whose listing failed are left out.
    pub async fn instances_by_region(&self, credentials: &AwsCredentials) -> InventoryByRegion {
        self.list_by_region(credentials)
            .await
            .into_iter()
            .filter_map(|(region, outcome)| outcome.into_fetched().map(|records| (region, records)))
            .collect()
    }

    pub async fn summary(&self, credentials: &AwsCredentials) -> Vec<RegionInventorySummary> {
        summarize(&self.instances_by_region(credentials).await)
    }
}

pub fn summarize(inventory: &InventoryByRegion) -> Vec<RegionInventorySummary> {
    inventory
        .iter()
        .map(|(region, records)| {
            let mut instance_types = BTreeMap::new();
            for record in records {
                *instance_types
                    .entry(record.instance_type.clone())
                    .or_insert(0) += 1;
            }
            RegionInventorySummary {
                region: region.clone(),
                instance_types,
            }
        })
        .collect()
}
