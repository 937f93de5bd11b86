use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use configparser::ini::Ini;

use crate::catalog::Catalog;
use crate::pricing::DEFAULT_PRICING_URL_TEMPLATE;
use crate::spot::DEFAULT_SPOT_ADVISOR_URL;

type Props = HashMap<String, Option<String>>;

// Later sections override earlier ones.
const SECTIONS: [&str; 3] = ["default", "server", "data"];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub path: Option<PathBuf>,
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub cache_ttl: Duration,
    pub request_timeout: Duration,
    pub fetch_concurrency: usize,
    pub regions: Option<Vec<String>>,
    pub pricing_url_template: String,
    pub spot_advisor_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            path: None,
            host: "127.0.0.1".to_string(),
            port: 8000,
            data_dir: PathBuf::from("data"),
            cache_ttl: Duration::from_secs(24 * 3600),
            request_timeout: Duration::from_secs(30),
            fetch_concurrency: 8,
            regions: None,
            pricing_url_template: DEFAULT_PRICING_URL_TEMPLATE.to_string(),
            spot_advisor_url: DEFAULT_SPOT_ADVISOR_URL.to_string(),
        }
    }
}

impl AppConfig {
    /// Loads `path`, or the first default location that exists. With no
    /// explicit path and no file on disk the built-in defaults apply.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let Some(path) = path.or_else(default_config_path) else {
            return Ok(Self::default());
        };
        let mut ini = Ini::new();
        ini.set_default_section("default");
        let map = ini
            .load(path.to_string_lossy().as_ref())
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        let mut props = Props::new();
        for section_name in SECTIONS {
            if let Some(section) = map
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(section_name))
                .map(|(_, values)| values)
            {
                for (key, value) in section {
                    props.insert(key.clone(), value.clone());
                }
            }
        }

        let config_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut config = Self::from_props(&props, &config_dir)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.path = Some(path);
        Ok(config)
    }

    fn from_props(props: &Props, config_dir: &Path) -> Result<Self> {
        let defaults = Self::default();
        let data_dir = optional(props, "data_dir")
            .map(|raw| data_path(config_dir, &raw))
            .unwrap_or(defaults.data_dir);
        let regions = optional(props, "regions").map(|raw| {
            raw.split(',')
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect::<Vec<_>>()
        });
        let config = Self {
            path: None,
            host: optional(props, "host").unwrap_or(defaults.host),
            port: parsed::<u16>(props, "port")?.unwrap_or(defaults.port),
            data_dir,
            cache_ttl: match parsed::<u64>(props, "cache_ttl_hours")? {
                Some(hours) => hours
                    .checked_mul(3600)
                    .map(Duration::from_secs)
                    .context("cache_ttl_hours out of range")?,
                None => defaults.cache_ttl,
            },
            request_timeout: parsed::<u64>(props, "request_timeout_secs")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            fetch_concurrency: parsed::<usize>(props, "fetch_concurrency")?
                .map(|value| value.max(1))
                .unwrap_or(defaults.fetch_concurrency),
            regions,
            pricing_url_template: optional(props, "pricing_url_template")
                .unwrap_or(defaults.pricing_url_template),
            spot_advisor_url: optional(props, "spot_advisor_url")
                .unwrap_or(defaults.spot_advisor_url),
        };
        config.catalog()?;
        Ok(config)
    }

    pub fn catalog(&self) -> Result<Catalog> {
        match &self.regions {
            Some(codes) => Catalog::restricted_to(codes).map_err(|err| anyhow::anyhow!(err)),
            None => Ok(Catalog::default()),
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    // Prefer config in the current working directory
    let local = PathBuf::from("spot-wizard.ini");
    if local.exists() {
        return Some(local);
    }
    let home = dirs::home_dir()?.join(".spot-wizard").join("config");
    home.exists().then_some(home)
}

/// Value for `key` with inline ` #`/` ;` comments removed; blank counts as unset.
fn optional(props: &Props, key: &str) -> Option<String> {
    let raw = props
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .and_then(|(_, value)| value.as_deref())?;
    let end = [" #", " ;"]
        .iter()
        .filter_map(|marker| raw.find(marker))
        .min()
        .unwrap_or(raw.len());
    let value = raw[..end].trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parsed<T>(props: &Props, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    optional(props, key)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("Invalid value for '{}': {}", key, raw))
        })
        .transpose()
}

/// `~/` expands to the home directory; other relative paths hang off the
/// directory holding the config file.
fn data_path(config_dir: &Path, value: &str) -> PathBuf {
    let home_relative = value
        .strip_prefix("~/")
        .or_else(|| value.strip_prefix("~\\"))
        .and_then(|rest| dirs::home_dir().map(|home| home.join(rest)));
    match home_relative {
        Some(path) => path,
        None if Path::new(value).is_relative() => config_dir.join(value),
        None => PathBuf::from(value),
    }
}
