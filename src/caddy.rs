//! Client for the Caddy admin endpoint

use crate::error::ControlError;
use crate::generator::Document;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// Pushes whole documents to Caddy and reads back the active one
pub struct CaddyClient {
    admin_url: String,
    http_client: reqwest::Client,
}

impl CaddyClient {
    pub fn new(admin_url: &str) -> Result<Self, ControlError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("caddy-proxy-manager/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            admin_url: admin_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn admin_url(&self) -> &str {
        &self.admin_url
    }

    /// Replace Caddy's active configuration. One attempt; only 200 counts.
    pub async fn load(&self, document: &Document) -> Result<(), ControlError> {
        let url = format!("{}/load", self.admin_url);
        let routes = document
            .apps
            .http
            .servers
            .values()
            .map(|s| s.routes.len())
            .sum::<usize>();
        debug!(url = %url, routes, "Pushing configuration to Caddy");

        let response = self.http_client.post(&url).json(document).send().await?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            warn!(status, body = %body, "Caddy rejected configuration");
            return Err(ControlError::Status { status, body });
        }

        info!(routes, "Caddy configuration reloaded");
        Ok(())
    }

    /// Fetch the configuration Caddy is currently running
    pub async fn get_config(&self) -> Result<serde_json::Value, ControlError> {
        let url = format!("{}/config/", self.admin_url);
        let response = self.http_client.get(&url).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if status != StatusCode::OK {
            return Err(ControlError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
