mod cache;
mod catalog;
mod cli;
mod config;
mod ec2;
mod error;
mod fetch;
mod inventory;
mod models;
mod pricing;
mod query;
mod refresh;
mod spot;
mod web;

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cache::CacheStore;
use crate::catalog::OperatingSystem;
use crate::cli::{Command, InventoryArgs, PricingArgs, RefreshArgs, ServeArgs};
use crate::config::AppConfig;
use crate::ec2::Ec2Client;
use crate::fetch::{HttpJsonSource, JsonSource};
use crate::inventory::{summarize, InventoryService};
use crate::models::AwsCredentials;
use crate::pricing::PricingFetcher;
use crate::query::PricingQueryService;
use crate::spot::SpotAdvisorService;
use crate::web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = cli::Cli::parse();
    let config = AppConfig::load(cli.config)?;
    if let Some(path) = &config.path {
        info!("Loaded config from {}", path.display());
    }

    match cli.command {
        Command::Serve(args) => handle_serve(args, &config).await,
        Command::Refresh(args) => handle_refresh(args, &config).await,
        Command::Pricing(args) => handle_pricing(args, &config),
        Command::SpotData => handle_spot_data(&config).await,
        Command::Inventory(args) => handle_inventory(args, &config).await,
    }
}

fn cache_store(config: &AppConfig) -> CacheStore {
    CacheStore::new(config.data_dir.clone(), config.cache_ttl)
}

fn json_source(config: &AppConfig) -> Result<Arc<dyn JsonSource>> {
    let source =
        HttpJsonSource::new(config.request_timeout).context("Failed to build HTTP client")?;
    Ok(Arc::new(source))
}

fn pricing_fetcher(config: &AppConfig, source: Arc<dyn JsonSource>) -> Result<PricingFetcher> {
    Ok(PricingFetcher::new(
        source,
        cache_store(config),
        config.catalog()?,
        config.pricing_url_template.clone(),
        config.fetch_concurrency,
    ))
}

async fn handle_serve(args: ServeArgs, config: &AppConfig) -> Result<()> {
    let host = args.host.unwrap_or_else(|| config.host.clone());
    let port = args.port.unwrap_or(config.port);
    if !args.allow_remote && !is_loopback_host(&host) {
        bail!(
            "Refusing to bind to non-loopback address without --allow-remote ({})",
            host
        );
    }

    let source = json_source(config)?;
    let fetcher = pricing_fetcher(config, source.clone())?;
    info!("Caching upstream data under {}", fetcher.cache().dir().display());
    tokio::spawn(async move {
        refresh::refresh_pricing(&fetcher, false).await;
    });

    let lister = Ec2Client::new(config.request_timeout)?;
    let state = AppState::new(
        SpotAdvisorService::new(source, cache_store(config), config.spot_advisor_url.clone()),
        PricingQueryService::new(cache_store(config)),
        InventoryService::new(Arc::new(lister)),
    );
    web::serve(state, host, port).await
}

async fn handle_refresh(args: RefreshArgs, config: &AppConfig) -> Result<()> {
    let fetcher = pricing_fetcher(config, json_source(config)?)?;
    match refresh::refresh_pricing(&fetcher, args.force).await {
        None => println!("Pricing data is fresh; nothing to do"),
        Some(batch) => {
            println!(
                "Fetched {} / failed {} / skipped {} of {} slots",
                batch.fetched(),
                batch.failed(),
                batch.skipped(),
                batch.slots.len()
            );
            if !batch.written {
                bail!("Pricing data was not written to {}", config.data_dir.display());
            }
        }
    }
    Ok(())
}

fn handle_pricing(args: PricingArgs, config: &AppConfig) -> Result<()> {
    let os: OperatingSystem = args.os.parse().map_err(|err: String| anyhow::anyhow!(err))?;
    let service = PricingQueryService::new(cache_store(config));
    let Some(rates) = service.rates_for(&args.region, os)? else {
        bail!(
            "No pricing data found for region {} and OS {}",
            args.region,
            os
        );
    };
    for rate in rates.values() {
        println!("{}\t{}\t{}", rate.instance_type, rate.price, rate.unit);
    }
    Ok(())
}

async fn handle_spot_data(config: &AppConfig) -> Result<()> {
    let service = SpotAdvisorService::new(
        json_source(config)?,
        cache_store(config),
        config.spot_advisor_url.clone(),
    );
    let document = service.get().await?;
    println!(
        "{} instance types, {} interruption ranges",
        document.instance_types.len(),
        document.ranges.len()
    );
    for (region, data) in &document.spot_advisor {
        let windows = data.windows.as_ref().map(|types| types.len()).unwrap_or(0);
        println!(
            "{}\tLinux {}\tWindows {}",
            region,
            data.linux.len(),
            windows
        );
    }
    Ok(())
}

async fn handle_inventory(args: InventoryArgs, config: &AppConfig) -> Result<()> {
    let credentials = AwsCredentials {
        access_key: args.access_key,
        secret_key: args.secret_key,
        session_token: args.session_token,
        regions: args.regions,
    };
    let service = InventoryService::new(Arc::new(Ec2Client::new(config.request_timeout)?));
    let inventory = service.instances_by_region(&credentials).await;
    if inventory.is_empty() {
        println!("No instances found");
        return Ok(());
    }
    if args.summary {
        for summary in summarize(&inventory) {
            for (instance_type, count) in &summary.instance_types {
                println!("{}\t{}\t{}", summary.region, instance_type, count);
            }
        }
    } else {
        for record in inventory.values().flatten() {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                record.region,
                record.instance_id,
                record.instance_type,
                record.state,
                record.private_ip.as_deref().unwrap_or("-"),
                record.platform
            );
        }
    }
    Ok(())
}

fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>()
        .map(|ip| ip.is_loopback())
        .unwrap_or(false)
}
