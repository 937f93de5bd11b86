use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use serde::{Deserialize, Serialize};

/// Region codes and the display names the public pricing endpoints key on.
/// Fetch-time URLs and query-time lookups both read this table.
pub const REGIONS: &[(&str, &str)] = &[
    ("us-east-1", "US East (N. Virginia)"),
    ("us-east-2", "US East (Ohio)"),
    ("us-west-1", "US West (N. California)"),
    ("us-west-2", "US West (Oregon)"),
    ("ap-south-1", "Asia Pacific (Mumbai)"),
    ("ap-south-2", "Asia Pacific (Hyderabad)"),
    ("ap-northeast-1", "Asia Pacific (Tokyo)"),
    ("ap-northeast-2", "Asia Pacific (Seoul)"),
    ("ap-northeast-3", "Asia Pacific (Osaka)"),
    ("ap-southeast-1", "Asia Pacific (Singapore)"),
    ("ap-southeast-2", "Asia Pacific (Sydney)"),
    ("ap-southeast-3", "Asia Pacific (Jakarta)"),
    ("ap-southeast-4", "Asia Pacific (Melbourne)"),
    ("ap-southeast-7", "Asia Pacific (Thailand)"),
    ("ap-east-1", "Asia Pacific (Hong Kong)"),
    ("ca-central-1", "Canada (Central)"),
    ("ca-west-1", "Canada (West)"),
    ("eu-central-1", "EU (Frankfurt)"),
    ("eu-central-2", "EU (Zurich)"),
    ("eu-west-1", "EU (Ireland)"),
    ("eu-west-2", "EU (London)"),
    ("eu-west-3", "EU (Paris)"),
    ("eu-north-1", "EU (Stockholm)"),
    ("eu-south-1", "EU (Milan)"),
    ("eu-south-2", "EU (Spain)"),
    ("sa-east-1", "South America (Sao Paulo)"),
    ("af-south-1", "Africa (Cape Town)"),
    ("me-central-1", "Middle East (UAE)"),
    ("me-south-1", "Middle East (Bahrain)"),
    ("il-central-1", "Israel (Tel Aviv)"),
    ("mx-central-1", "Mexico (Central)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperatingSystem {
    Linux,
    Windows,
}

impl OperatingSystem {
    pub const ALL: [OperatingSystem; 2] = [OperatingSystem::Linux, OperatingSystem::Windows];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingSystem::Linux => "Linux",
            OperatingSystem::Windows => "Windows",
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingSystem {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        OperatingSystem::ALL
            .into_iter()
            .find(|os| os.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| format!("Unsupported operating system: {}", trimmed))
    }
}

/// The slice of [`REGIONS`] a process fetches, plus the OS set.
#[derive(Debug, Clone)]
pub struct Catalog {
    regions: Vec<(&'static str, &'static str)>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            regions: REGIONS.to_vec(),
        }
    }
}

impl Catalog {
    /// Restricts the catalog to `codes`, keeping table order.
    /// Unknown codes are rejected so a typo never silently drops a region.
    pub fn restricted_to(codes: &[String]) -> Result<Self, String> {
        if let Some(unknown) = codes.iter().find(|code| display_name(code).is_none()) {
            return Err(format!("Unknown region code in catalog filter: {}", unknown));
        }
        let regions = REGIONS
            .iter()
            .copied()
            .filter(|(code, _)| codes.iter().any(|wanted| wanted == code))
            .collect();
        Ok(Self { regions })
    }

    pub fn regions(&self) -> &[(&'static str, &'static str)] {
        &self.regions
    }

    pub fn operating_systems(&self) -> &'static [OperatingSystem] {
        &OperatingSystem::ALL
    }

    /// Every (code, name, os) slot in fetch order.
    pub fn slots(&self) -> Vec<(&'static str, &'static str, OperatingSystem)> {
        self.regions
            .iter()
            .flat_map(|(code, name)| {
                self.operating_systems()
                    .iter()
                    .map(move |os| (*code, *name, *os))
            })
            .collect()
    }
}

pub fn display_name(code: &str) -> Option<&'static str> {
    REGIONS
        .iter()
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, name)| *name)
}

/// Maps a region code to its pricing name, passing unknown input through
/// so regions newer than the table still resolve against the document.
pub fn resolve_region_name(code: &str) -> &str {
    display_name(code).unwrap_or(code)
}

/// Shape of an AWS region code (`us-east-1`, `us-gov-west-1`). Anything else
/// must never reach an endpoint hostname.
pub fn is_region_code(code: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d+$").ok())
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(code))
}
