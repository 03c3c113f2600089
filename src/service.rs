//! Host administration: every mutation is persisted, then the full Caddy
//! document is rebuilt from the store and pushed.
//!
//! A push failure after a committed write is reported as the operation's
//! failure. The store is not rolled back and nothing is retried. Concurrent
//! writers each rebuild and push independently, so the last push wins.

use crate::caddy::CaddyClient;
use crate::db::Database;
use crate::error::ServiceError;
use crate::generator::{build_document, Document};
use crate::models::ProxyHost;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fields an update body can never overwrite
const PROTECTED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

pub struct HostService {
    db: Arc<Database>,
    client: Arc<CaddyClient>,
}

impl HostService {
    pub fn new(db: Arc<Database>, client: Arc<CaddyClient>) -> Self {
        Self { db, client }
    }

    pub fn list_hosts(&self) -> Result<Vec<ProxyHost>, ServiceError> {
        Ok(self.db.list_hosts(false)?)
    }

    pub fn get_host(&self, id: i64) -> Result<ProxyHost, ServiceError> {
        self.db.get_host(id)?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn create_host(&self, host: ProxyHost) -> Result<ProxyHost, ServiceError> {
        host.validate().map_err(ServiceError::Validation)?;

        let created = self.db.create_host(&host)?;
        info!(id = created.id, domains = %created.domain_names, "Proxy host created");

        self.sync().await?;
        Ok(created)
    }

    /// Overlay the fields present in `patch` onto the stored host
    pub async fn update_host(&self, id: i64, patch: Value) -> Result<ProxyHost, ServiceError> {
        let existing = self.get_host(id)?;
        let updated = merge_patch(&existing, patch, &PROTECTED_FIELDS)?;
        updated.validate().map_err(ServiceError::Validation)?;

        if !self.db.update_host(&updated)? {
            return Err(ServiceError::NotFound(id));
        }
        info!(id, domains = %updated.domain_names, "Proxy host updated");

        self.sync().await?;
        self.get_host(id)
    }

    pub async fn delete_host(&self, id: i64) -> Result<(), ServiceError> {
        if !self.db.delete_host(id)? {
            return Err(ServiceError::NotFound(id));
        }
        info!(id, "Proxy host deleted");

        self.sync().await
    }

    pub async fn toggle_host(&self, id: i64) -> Result<ProxyHost, ServiceError> {
        let existing = self.get_host(id)?;
        let enabled = !existing.enabled;

        if !self.db.set_host_enabled(id, enabled)? {
            return Err(ServiceError::NotFound(id));
        }
        info!(id, enabled, "Proxy host toggled");

        self.sync().await?;
        self.get_host(id)
    }

    /// Rebuild the document from every stored host and push it
    pub async fn sync(&self) -> Result<(), ServiceError> {
        let document = self.preview_document()?;
        self.client.load(&document).await?;
        Ok(())
    }

    /// Push the current document at startup; failure is only logged
    pub async fn sync_on_startup(&self) {
        match self.sync().await {
            Ok(()) => info!("Initial Caddy configuration applied"),
            Err(e) => warn!(error = %e, "Initial Caddy sync failed, continuing"),
        }
    }

    /// The document a sync would push right now
    pub fn preview_document(&self) -> Result<Document, ServiceError> {
        let hosts = self.db.list_hosts(false)?;
        debug!(hosts = hosts.len(), "Building Caddy document");
        Ok(build_document(&hosts))
    }

    /// The configuration Caddy is running
    pub async fn live_config(&self) -> Result<Value, ServiceError> {
        Ok(self.client.get_config().await?)
    }
}

/// Overlay the fields of a JSON object onto `existing`, skipping `protected`
pub(crate) fn merge_patch<T>(existing: &T, patch: Value, protected: &[&str]) -> Result<T, ServiceError>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(patch) = patch else {
        return Err(ServiceError::Validation(
            "Update body must be a JSON object".to_string(),
        ));
    };

    let mut merged = serde_json::to_value(existing).map_err(anyhow::Error::from)?;
    if let Value::Object(fields) = &mut merged {
        for (key, value) in patch {
            if !protected.contains(&key.as_str()) {
                fields.insert(key, value);
            }
        }
    }

    serde_json::from_value(merged)
        .map_err(|e| ServiceError::Validation(format!("Invalid field value: {}", e)))
}
