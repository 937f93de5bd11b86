use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

use crate::catalog::is_region_code;
use crate::inventory::InstanceLister;
use crate::models::{AwsCredentials, InventoryRecord};

const API_VERSION: &str = "2016-11-15";
const SERVICE: &str = "ec2";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

// RFC 3986 unreserved characters stay literal, everything else is escaped.
const URI_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

type HmacSha256 = Hmac<Sha256>;

/// EC2 Query API client for `DescribeInstances`, signed with SigV4.
pub struct Ec2Client {
    http: reqwest::Client,
}

impl Ec2Client {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn describe_instances_page(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        next_token: Option<&str>,
    ) -> Result<DescribeInstancesResponse> {
        let mut query = vec![
            ("Action".to_string(), "DescribeInstances".to_string()),
            ("Version".to_string(), API_VERSION.to_string()),
        ];
        if let Some(token) = next_token {
            query.push(("NextToken".to_string(), token.to_string()));
        }
        let (url, host, canonical_query) = build_url(region, &mut query).context("build url")?;

        let signer = Signer::new(credentials, region);
        let headers = signer.signed_headers(&host, &canonical_query, OffsetDateTime::now_utc())?;

        let response = self.http.get(url).headers(headers).send().await?;
        let body = read_body(response)
            .await
            .with_context(|| format!("DescribeInstances in {}", region))?;
        quick_xml::de::from_str(&body).context("Failed to parse DescribeInstances response")
    }
}

async fn read_body(response: reqwest::Response) -> Result<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context("Failed to read response body")?;
    if !status.is_success() {
        bail!("EC2 error {}: {}", status, body);
    }
    Ok(body)
}

#[async_trait]
impl InstanceLister for Ec2Client {
    async fn list_instances(
        &self,
        credentials: &AwsCredentials,
        region: &str,
    ) -> Result<Vec<InventoryRecord>> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let page = self
                .describe_instances_page(credentials, region, next_token.as_deref())
                .await?;
            records.extend(page.records(region));
            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => {
                    debug!("Following DescribeInstances pagination in {}", region);
                    next_token = Some(token);
                }
                None => break,
            }
        }
        Ok(records)
    }
}

fn build_url(region: &str, query: &mut [(String, String)]) -> Result<(Url, String, String)> {
    if !is_region_code(region) {
        bail!("Invalid region code: {}", region);
    }
    query.sort_by(|a, b| a.0.cmp(&b.0));
    let canonical_query = query
        .iter()
        .map(|(key, value)| format!("{}={}", uri_encode(key), uri_encode(value)))
        .collect::<Vec<_>>()
        .join("&");
    let url = Url::parse(&format!(
        "https://ec2.{}.amazonaws.com/?{}",
        region, canonical_query
    ))?;
    let host = url
        .host_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Missing host in url"))?;
    Ok((url, host, canonical_query))
}

fn uri_encode(value: &str) -> String {
    utf8_percent_encode(value, URI_ESCAPES).to_string()
}

struct Signer<'a> {
    access_key: &'a str,
    secret_key: &'a str,
    session_token: Option<&'a str>,
    region: &'a str,
}

impl<'a> Signer<'a> {
    fn new(credentials: &'a AwsCredentials, region: &'a str) -> Self {
        Self {
            access_key: &credentials.access_key,
            secret_key: &credentials.secret_key,
            session_token: credentials.session_token.as_deref(),
            region,
        }
    }

    fn signed_headers(
        &self,
        host: &str,
        canonical_query: &str,
        now: OffsetDateTime,
    ) -> Result<HeaderMap> {
        let amz_date = now.format(format_description!(
            "[year][month][day]T[hour][minute][second]Z"
        ))?;
        let date_stamp = &amz_date[..8];

        let mut header_items = vec![("host", host.to_string()), ("x-amz-date", amz_date.clone())];
        if let Some(token) = self.session_token {
            header_items.push(("x-amz-security-token", token.to_string()));
        }
        let signed_header_names = header_items
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = build_canonical_request(
            "GET",
            "/",
            canonical_query,
            &header_items,
            &signed_header_names,
            &hex_sha256(b""),
        );
        let scope = format!("{}/{}/{}/aws4_request", date_stamp, self.region, SERVICE);
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            ALGORITHM,
            amz_date,
            scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let key = signing_key(self.secret_key, date_stamp, self.region, SERVICE)?;
        let signature = to_hex(&hmac_sha256(&key, string_to_sign.as_bytes())?);

        let mut headers = HeaderMap::new();
        for (name, value) in &header_items {
            if *name == "host" {
                continue;
            }
            headers.insert(HeaderName::from_static(*name), HeaderValue::from_str(value)?);
        }
        let auth_header = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            ALGORITHM, self.access_key, scope, signed_header_names, signature
        );
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&auth_header)?);
        Ok(headers)
    }
}

fn build_canonical_request(
    method: &str,
    path: &str,
    canonical_query: &str,
    header_items: &[(&str, String)],
    signed_header_names: &str,
    payload_hash: &str,
) -> String {
    let mut canonical_headers = String::new();
    for (name, value) in header_items {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(value.trim());
        canonical_headers.push('\n');
    }
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, path, canonical_query, canonical_headers, signed_header_names, payload_hash
    )
}

fn hex_sha256(data: &[u8]) -> String {
    to_hex(&Sha256::digest(data))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|err| anyhow::anyhow!("Invalid HMAC key: {}", err))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

fn signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let date_key = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let service_key = hmac_sha256(&region_key, service.as_bytes())?;
    hmac_sha256(&service_key, b"aws4_request")
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "reservationSet", default)]
    reservation_set: ItemSet<Reservation>,
    #[serde(rename = "nextToken", default)]
    next_token: Option<String>,
}

impl DescribeInstancesResponse {
    fn records(&self, region: &str) -> Vec<InventoryRecord> {
        self.reservation_set
            .items
            .iter()
            .flat_map(|reservation| reservation.instances_set.items.iter())
            .filter(|instance| instance.instance_state.name != "terminated")
            .map(|instance| InventoryRecord {
                instance_id: instance.instance_id.clone(),
                instance_type: instance.instance_type.clone(),
                region: region.to_string(),
                state: instance.instance_state.name.clone(),
                private_ip: instance.private_ip_address.clone(),
                public_ip: instance.ip_address.clone(),
                platform: if instance.platform.as_deref() == Some("windows") {
                    "Windows".to_string()
                } else {
                    "Linux".to_string()
                },
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemSet<T> {
    #[serde(rename = "item", default)]
    items: Vec<T>,
}

impl<T> Default for ItemSet<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

#[derive(Debug, Deserialize)]
struct Reservation {
    #[serde(rename = "instancesSet", default)]
    instances_set: ItemSet<Ec2Instance>,
}

#[derive(Debug, Deserialize)]
struct Ec2Instance {
    #[serde(rename = "instanceId")]
    instance_id: String,
    #[serde(rename = "instanceType")]
    instance_type: String,
    #[serde(rename = "instanceState")]
    instance_state: InstanceState,
    #[serde(rename = "privateIpAddress", default)]
    private_ip_address: Option<String>,
    #[serde(rename = "ipAddress", default)]
    ip_address: Option<String>,
    #[serde(default)]
    platform: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceState {
    name: String,
}
