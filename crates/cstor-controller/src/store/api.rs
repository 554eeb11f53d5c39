use super::PoolStore;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use cstor_core::{CStorPool, API_GROUP, API_VERSION, PLURAL};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

/// List envelope returned by the collection endpoint
#[derive(Debug, Deserialize)]
struct CStorPoolList {
    #[serde(default)]
    items: Vec<CStorPool>,
}

/// Resource store backed by the cluster API server
pub struct ApiPoolStore {
    base_url: String,
    client: Client,
}

impl ApiPoolStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!(
            "{}/apis/{}/{}/{}",
            self.base_url, API_GROUP, API_VERSION, PLURAL
        )
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}", self.collection_url(), name)
    }

    /// Read the body, turning non-success statuses into store errors
    async fn body(resp: Response, verb: &str, name: &str) -> Result<String> {
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ControllerError::api_request_failed(format!("reading body: {}", e)))?;

        if status.is_success() {
            return Ok(body);
        }

        match (status, verb) {
            (StatusCode::NOT_FOUND, _) => Err(ControllerError::not_found(name)),
            (StatusCode::CONFLICT, "POST") => Err(ControllerError::already_exists(name)),
            (StatusCode::CONFLICT, _) => Err(ControllerError::conflict(name)),
            _ => Err(ControllerError::api_request_failed(format!(
                "{} {} failed with status {}: {}",
                verb, name, status, body
            ))),
        }
    }
}

fn send_failed(e: reqwest::Error) -> ControllerError {
    ControllerError::api_request_failed(format!("HTTP request failed: {}", e))
}

#[async_trait]
impl PoolStore for ApiPoolStore {
    /// GET /apis/openebs.io/v1alpha1/cstorpools/{name}
    async fn get(&self, name: &str) -> Result<CStorPool> {
        let url = self.resource_url(name);
        debug!("GET {}", url);

        let resp = self.client.get(&url).send().await.map_err(send_failed)?;
        let body = Self::body(resp, "GET", name).await?;
        Ok(cstor_core::from_json(&body)?)
    }

    /// GET /apis/openebs.io/v1alpha1/cstorpools
    async fn list(&self) -> Result<Vec<CStorPool>> {
        let url = self.collection_url();
        debug!("GET {}", url);

        let resp = self.client.get(&url).send().await.map_err(send_failed)?;
        let body = Self::body(resp, "GET", PLURAL).await?;
        let list: CStorPoolList = cstor_core::from_json(&body)?;
        Ok(list.items)
    }

    /// POST /apis/openebs.io/v1alpha1/cstorpools
    async fn create(&self, pool: &CStorPool) -> Result<CStorPool> {
        let url = self.collection_url();
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(pool)
            .send()
            .await
            .map_err(send_failed)?;
        let body = Self::body(resp, "POST", pool.name()).await?;
        Ok(cstor_core::from_json(&body)?)
    }

    /// PUT /apis/openebs.io/v1alpha1/cstorpools/{name}
    async fn update(&self, pool: &CStorPool) -> Result<CStorPool> {
        let url = self.resource_url(pool.name());
        debug!("PUT {}", url);

        let resp = self
            .client
            .put(&url)
            .json(pool)
            .send()
            .await
            .map_err(send_failed)?;
        let body = Self::body(resp, "PUT", pool.name()).await?;
        Ok(cstor_core::from_json(&body)?)
    }
}
