//! Remote server inventory
//!
//! Plain CRUD keyed by a generated uuid. Changes here never touch Caddy.

use crate::db::Database;
use crate::error::ServiceError;
use crate::models::RemoteServer;
use crate::service::merge_patch;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

const PROTECTED_FIELDS: [&str; 4] = ["id", "uuid", "created_at", "updated_at"];

pub struct RemoteServerService {
    db: Arc<Database>,
}

impl RemoteServerService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn list(&self, enabled_only: bool) -> Result<Vec<RemoteServer>, ServiceError> {
        Ok(self.db.list_remote_servers(enabled_only)?)
    }

    pub fn get(&self, uuid: &str) -> Result<RemoteServer, ServiceError> {
        self.db
            .get_remote_server(uuid)?
            .ok_or_else(|| ServiceError::ServerNotFound(uuid.to_string()))
    }

    /// Store a new server under a fresh uuid; any uuid in the input is replaced
    pub fn create(&self, server: RemoteServer) -> Result<RemoteServer, ServiceError> {
        server.validate().map_err(ServiceError::Validation)?;

        let server = RemoteServer {
            uuid: uuid::Uuid::new_v4().to_string(),
            ..server
        };
        let created = self.db.create_remote_server(&server)?;
        info!(uuid = %created.uuid, name = %created.name, "Remote server created");
        Ok(created)
    }

    pub fn update(&self, uuid: &str, patch: Value) -> Result<RemoteServer, ServiceError> {
        let existing = self.get(uuid)?;
        let updated = merge_patch(&existing, patch, &PROTECTED_FIELDS)?;
        updated.validate().map_err(ServiceError::Validation)?;

        if !self.db.update_remote_server(&updated)? {
            return Err(ServiceError::ServerNotFound(uuid.to_string()));
        }
        info!(uuid, name = %updated.name, "Remote server updated");

        self.get(uuid)
    }

    pub fn delete(&self, uuid: &str) -> Result<(), ServiceError> {
        if !self.db.delete_remote_server(uuid)? {
            return Err(ServiceError::ServerNotFound(uuid.to_string()));
        }
        info!(uuid, "Remote server deleted");
        Ok(())
    }
}
