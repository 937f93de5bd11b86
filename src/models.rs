use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingRate {
    pub instance_type: String,
    pub price: String,
    pub unit: String,
    pub description: Option<String>,
}

impl PricingRate {
    pub fn on_demand(instance_type: &str, price: String) -> Self {
        Self {
            instance_type: instance_type.to_string(),
            price,
            unit: "Hrs".to_string(),
            description: Some(format!("On-demand price for {}", instance_type)),
        }
    }
}

pub type RateTable = BTreeMap<String, PricingRate>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingResponse {
    pub regions: BTreeMap<String, RateTable>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceTypeInfo {
    pub emr: bool,
    pub cores: u32,
    pub ram_gb: f64,
}

/// One interruption-frequency bucket of the advisor's legend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub index: u32,
    pub label: String,
    pub dots: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotMetrics {
    /// Savings over on-demand, percent.
    pub s: u32,
    /// Index into `ranges`.
    pub r: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSpotData {
    #[serde(rename = "Linux")]
    pub linux: BTreeMap<String, SpotMetrics>,
    #[serde(rename = "Windows", default, skip_serializing_if = "Option::is_none")]
    pub windows: Option<BTreeMap<String, SpotMetrics>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotAdvisorDocument {
    pub instance_types: BTreeMap<String, InstanceTypeInfo>,
    pub ranges: Vec<ScoreRange>,
    pub spot_advisor: BTreeMap<String, RegionSpotData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AwsCredentials {
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    pub regions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub instance_id: String,
    pub instance_type: String,
    pub region: String,
    pub state: String,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub platform: String,
}

impl InventoryRecord {
    pub fn is_terminated(&self) -> bool {
        self.state.eq_ignore_ascii_case("terminated")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInventorySummary {
    pub region: String,
    pub instance_types: BTreeMap<String, u32>,
}

pub type InventoryByRegion = IndexMap<String, Vec<InventoryRecord>>;

/// Result of one slot of a batch fetch or listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SlotOutcome<T> {
    Fetched(T),
    Failed(String),
    Skipped(String),
}

impl<T> SlotOutcome<T> {
    pub fn is_fetched(&self) -> bool {
        matches!(self, SlotOutcome::Fetched(_))
    }

    pub fn into_fetched(self) -> Option<T> {
        match self {
            SlotOutcome::Fetched(value) => Some(value),
            _ => None,
        }
    }
}
