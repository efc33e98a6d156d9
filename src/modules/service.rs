// HTTP client for the misp-modules service

use super::invoker::{EnrichmentRequest, EnrichmentResponse, ModuleInvoker};
use super::{Catalog, ModuleDescriptor};
use crate::error::{GlueError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Client for the module service's `/modules` and `/query` endpoints
#[derive(Debug, Clone)]
pub struct ModuleService {
    base_url: String,
    client: Client,
}

impl ModuleService {
    /// Create a client; every request is bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GlueError::Http {
                source: e,
                context: "Failed to build module service client".to_string(),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Fetch every module descriptor the service knows about
    pub async fn fetch_catalog(&self) -> Result<Catalog> {
        let url = format!("{}/modules", self.base_url);
        tracing::debug!("Fetching module catalog from {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| GlueError::Http {
            source: e,
            context: format!("Failed to reach module service at {}", url),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GlueError::HttpStatus {
                status: status.as_u16(),
                context: format!("GET {}", url),
            });
        }

        let body = response.bytes().await.map_err(|e| GlueError::Http {
            source: e,
            context: "Failed to read module catalog body".to_string(),
        })?;

        let modules: Vec<ModuleDescriptor> =
            serde_json::from_slice(&body).map_err(|e| GlueError::Json {
                source: e,
                context: "Failed to parse module catalog".to_string(),
            })?;

        tracing::info!("Loaded {} modules from {}", modules.len(), self.base_url);
        Ok(Catalog::new(modules))
    }
}

#[async_trait]
impl ModuleInvoker for ModuleService {
    async fn invoke(&self, request: &EnrichmentRequest<'_>) -> Result<EnrichmentResponse> {
        let url = format!("{}/query", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request.to_payload())
            .send()
            .await
            .map_err(|e| GlueError::Http {
                source: e,
                context: format!("Module {} query failed", request.module),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GlueError::HttpStatus {
                status: status.as_u16(),
                context: format!("module {} query", request.module),
            });
        }

        let body = response.bytes().await.map_err(|e| GlueError::Http {
            source: e,
            context: format!("Failed to read module {} response", request.module),
        })?;

        EnrichmentResponse::parse(request.module, &body)
    }
}
