//! slurmrestd API client
//!
//! Implements the node queries of the slurmrestd REST API.
//! Authentication uses a JWT passed in the `X-SLURM-USER-TOKEN` header.

use crate::error::SlurmError;
use crate::models::{API_VERSION, Node, NodesResponse};
use crate::slurm_trait::SlurmClientTrait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const TOKEN_HEADER: &str = "X-SLURM-USER-TOKEN";

/// slurmrestd API client
pub struct SlurmClient {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for SlurmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlurmClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SlurmClient {
    /// Create a new slurmrestd client
    ///
    /// # Arguments
    /// * `base_url` - slurmrestd base URL (e.g., "http://slurm-restapi:6820")
    /// * `token` - JWT used for authentication
    pub fn new(base_url: String, token: String) -> Result<Self, SlurmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/slurm/{}/{}", self.base_url, API_VERSION, path.trim_start_matches('/'))
    }

    /// GET a slurmrestd path and decode the JSON body
    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, SlurmError> {
        let url = self.url(path);
        debug!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(SlurmError::Authentication(format!("{} - {}", status, body)))
            }
            StatusCode::NOT_FOUND => Err(SlurmError::NotFound(url)),
            s if !s.is_success() => Err(SlurmError::Api(format!(
                "GET {} failed: {} - {}",
                url,
                s,
                body.chars().take(500).collect::<String>()
            ))),
            _ => serde_json::from_str(&body).map_err(SlurmError::Serialization),
        }
    }

    /// Turn errors embedded in a 200 response into an `Api` error
    fn check_errors(response: NodesResponse) -> Result<Vec<Node>, SlurmError> {
        if response.errors.is_empty() {
            return Ok(response.nodes);
        }
        let messages: Vec<String> = response.errors.iter().map(|e| e.summary()).collect();
        Err(SlurmError::Api(messages.join("; ")))
    }
}

#[async_trait::async_trait]
impl SlurmClientTrait for SlurmClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn ping(&self) -> Result<(), SlurmError> {
        let _: serde_json::Value = self.get("ping/").await?;
        debug!("slurmrestd at {} answered ping", self.base_url);
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, SlurmError> {
        let response: NodesResponse = self.get("nodes/").await?;
        Self::check_errors(response)
    }

    async fn get_node(&self, name: &str) -> Result<Node, SlurmError> {
        let response: NodesResponse = self.get(&format!("node/{}", name)).await?;
        Self::check_errors(response)?
            .into_iter()
            .find(|node| node.name == name)
            .ok_or_else(|| SlurmError::NotFound(format!("Node {} not found", name)))
    }
}
