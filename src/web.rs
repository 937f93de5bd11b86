use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::catalog::OperatingSystem;
use crate::error::ServiceError;
use crate::inventory::InventoryService;
use crate::models::{
    AwsCredentials, InventoryByRegion, PricingResponse, RegionInventorySummary,
    SpotAdvisorDocument,
};
use crate::query::PricingQueryService;
use crate::spot::SpotAdvisorService;

#[derive(Clone)]
pub struct AppState {
    spot: Arc<SpotAdvisorService>,
    pricing: PricingQueryService,
    inventory: Arc<InventoryService>,
}

impl AppState {
    pub fn new(
        spot: SpotAdvisorService,
        pricing: PricingQueryService,
        inventory: InventoryService,
    ) -> Self {
        Self {
            spot: Arc::new(spot),
            pricing,
            inventory: Arc::new(inventory),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/spot-data", get(spot_data))
        .route("/api/pricing", get(pricing))
        .route("/api/ec2-instances", post(ec2_instances))
        .route("/api/ec2-summary", post(ec2_summary))
        .route("/api/aws/ec2-instances", post(ec2_instances))
        .route("/api/aws/ec2-summary", post(ec2_summary))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

pub async fn serve(state: AppState, host: String, port: u16) -> Result<()> {
    let app = router(state);
    let address = format!("{}:{}", host, port);
    info!("API running at http://{}", address);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// Dashboard is served from another origin.
async fn cors_middleware(request: Request<Body>, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(response.headers_mut());
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("600"));
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn spot_data(
    State(state): State<AppState>,
) -> Result<Json<SpotAdvisorDocument>, ServiceError> {
    Ok(Json(state.spot.get().await?))
}

#[derive(Debug, Deserialize)]
struct PricingQuery {
    region: String,
    os: String,
}

async fn pricing(
    State(state): State<AppState>,
    Query(query): Query<PricingQuery>,
) -> Result<Json<PricingResponse>, ServiceError> {
    let not_found = || {
        ServiceError::NotFound(format!(
            "No pricing data found for region {} and OS {}",
            query.region, query.os
        ))
    };
    let os: OperatingSystem = query.os.parse().map_err(|_| not_found())?;

    let service = state.pricing.clone();
    let region = query.region.clone();
    let rates = tokio::task::spawn_blocking(move || service.rates_for(&region, os))
        .await
        .map_err(|err| {
            error!("Pricing lookup task failed: {}", err);
            ServiceError::Internal(err.to_string())
        })??
        .ok_or_else(not_found)?;

    let mut regions = BTreeMap::new();
    regions.insert(query.region.clone(), rates);
    Ok(Json(PricingResponse { regions }))
}

async fn ec2_instances(
    State(state): State<AppState>,
    body: Result<Json<AwsCredentials>, JsonRejection>,
) -> Result<Json<InventoryByRegion>, ServiceError> {
    let Json(credentials) = body?;
    Ok(Json(state.inventory.instances_by_region(&credentials).await))
}

async fn ec2_summary(
    State(state): State<AppState>,
    body: Result<Json<AwsCredentials>, JsonRejection>,
) -> Result<Json<Vec<RegionInventorySummary>>, ServiceError> {
    let Json(credentials) = body?;
    Ok(Json(state.inventory.summary(&credentials).await))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::scratch_dir;
    use crate::cache::CacheStore;
    use crate::fetch::testing::FakeSource;
    use crate::inventory::InstanceLister;
    use crate::models::InventoryRecord;
    use crate::pricing::tests::region_body;
    use crate::pricing::PRICING_CACHE_KEY;
    use async_trait::async_trait;
    use std::time::Duration;

    const SPOT_URL: &str = "https://spot.test/advisor.json";

    struct OneRegionLister;

    #[async_trait]
    impl InstanceLister for OneRegionLister {
        async fn list_instances(
            &self,
            _credentials: &AwsCredentials,
            region: &str,
        ) -> Result<Vec<InventoryRecord>> {
            if region != "us-east-1" {
                anyhow::bail!("AuthFailure");
            }
            Ok(vec![InventoryRecord {
                instance_id: "i-0abc".to_string(),
                instance_type: "t3.micro".to_string(),
                region: region.to_string(),
                state: "running".to_string(),
                private_ip: Some("10.0.0.5".to_string()),
                public_ip: None,
                platform: "Linux".to_string(),
            }])
        }
    }

    fn state(name: &str, source: FakeSource) -> (AppState, CacheStore) {
        let cache = CacheStore::new(scratch_dir(name), Duration::from_secs(24 * 3600));
        let state = AppState::new(
            SpotAdvisorService::new(Arc::new(source), cache.clone(), SPOT_URL.to_string()),
            PricingQueryService::new(cache.clone()),
            InventoryService::new(Arc::new(OneRegionLister)),
        );
        (state, cache)
    }

    fn pricing_query(region: &str, os: &str) -> Query<PricingQuery> {
        Query(PricingQuery {
            region: region.to_string(),
            os: os.to_string(),
        })
    }

    #[tokio::test]
    async fn pricing_returns_rates_keyed_by_region_code() {
        let (state, cache) = state("web_pricing", FakeSource::default());
        let document = json!({
            "us-east-1": { "Linux": region_body("US East (N. Virginia)", &[("t3.micro", "0.0104")]) }
        });
        assert!(cache.put(PRICING_CACHE_KEY, &document));

        let Json(response) = pricing(State(state.clone()), pricing_query("us-east-1", "linux"))
            .await
            .expect("rates");
        assert_eq!(response.regions["us-east-1"]["t3.micro"].price, "0.0104");

        let err = pricing(State(state.clone()), pricing_query("us-east-1", "Windows"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = pricing(State(state), pricing_query("us-east-1", "BeOS"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn pricing_without_document_is_server_error() {
        let (state, _) = state("web_pricing_missing", FakeSource::default());
        let err = pricing(State(state), pricing_query("us-east-1", "Linux"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PricingDataMissing));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn spot_data_upstream_down_is_unavailable() {
        let (state, _) = state("web_spot_down", FakeSource::default().failing(SPOT_URL, 500));
        let err = spot_data(State(state)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn routes_serve_json_with_cors_headers() {
        let (state, _) = state("web_routes", FakeSource::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });
        let client = reqwest::Client::new();
        let base = format!("http://{}", address);

        let health = client.get(format!("{}/health", base)).send().await.unwrap();
        assert_eq!(
            health.headers()[ACCESS_CONTROL_ALLOW_ORIGIN.as_str()],
            "*"
        );
        assert_eq!(health.json::<Value>().await.unwrap(), json!({ "status": "ok" }));

        let preflight = client
            .request(reqwest::Method::OPTIONS, format!("{}/api/ec2-summary", base))
            .send()
            .await
            .unwrap();
        assert_eq!(preflight.status().as_u16(), 204);

        let body = json!({
            "access_key": "AKID",
            "secret_key": "secret",
            "regions": ["us-east-1", "eu-west-1"]
        });
        let summary: Value = client
            .post(format!("{}/api/aws/ec2-summary", base))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            summary,
            json!([{ "region": "us-east-1", "instance_types": { "t3.micro": 1 } }])
        );

        let rejected = client
            .post(format!("{}/api/ec2-instances", base))
            .json(&json!({ "access_key": "AKID" }))
            .send()
            .await
            .unwrap();
        assert_eq!(rejected.status().as_u16(), 422);
        let detail: Value = rejected.json().await.unwrap();
        assert!(detail["detail"].as_str().unwrap().starts_with("Invalid request"));

        let missing = client
            .get(format!("{}/api/pricing?region=us-east-1&os=Linux", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status().as_u16(), 500);
        let detail: Value = missing.json().await.unwrap();
        assert!(detail["detail"].as_str().unwrap().contains("Pricing data not available"));
    }
}
