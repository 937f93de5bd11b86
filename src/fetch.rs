use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde_json::Value;
use tracing::debug;

use crate::error::FetchError;

/// Source of upstream JSON documents.
#[async_trait]
pub trait JsonSource: Send + Sync {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError>;
}

/// reqwest-backed source. Gzip negotiation is handled by the client.
pub struct HttpJsonSource {
    http: reqwest::Client,
}

impl HttpJsonSource {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("spot-wizard/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl JsonSource for HttpJsonSource {
    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|err| FetchError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Canned upstream: unknown URLs answer 404.
    #[derive(Default)]
    pub(crate) struct FakeSource {
        responses: HashMap<String, Result<Value, u16>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub(crate) fn with(mut self, url: impl Into<String>, body: Value) -> Self {
            self.responses.insert(url.into(), Ok(body));
            self
        }

        pub(crate) fn failing(mut self, url: impl Into<String>, status: u16) -> Self {
            self.responses.insert(url.into(), Err(status));
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JsonSource for FakeSource {
        async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
            self.calls.lock().unwrap().push(url.to_string());
            match self.responses.get(url) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) => Err(FetchError::Status { status: *status }),
                None => Err(FetchError::Status { status: 404 }),
            }
        }
    }
}
