//! Dev-mode collaborators.
//!
//! `fleetgridd dev` runs the full provisioning loop against an in-memory
//! cloud with file-backed policies, a fixed backlog, and a secret store
//! that only logs. Useful for trying out policies and watching the bid
//! selection without any cloud account.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use fleetgrid_provisioner::{
    PolicyStore, Queue, SecretRecord, SecretStore, StoreError, StoreResult,
};
use fleetgrid_types::{ObservedState, WorkerTypePolicy};

/// Loads `*.json` policy records from a directory, migrating old schema
/// versions on read. Observed state is written back next to them under
/// `observed/`.
pub struct DirPolicyStore {
    dir: PathBuf,
}

impl DirPolicyStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl PolicyStore for DirPolicyStore {
    async fn list_policies(&self) -> StoreResult<Vec<WorkerTypePolicy>> {
        let entries = std::fs::read_dir(&self.dir)
            .map_err(|e| StoreError(format!("{}: {e}", self.dir.display())))?;

        let mut policies = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StoreError(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError(format!("{}: {e}", path.display())))?;
            let record: serde_json::Value = serde_json::from_str(&raw)
                .map_err(|e| StoreError(format!("{}: {e}", path.display())))?;
            let policy = WorkerTypePolicy::from_versioned(&record)
                .map_err(|e| StoreError(format!("{}: {e}", path.display())))?;
            debug!(worker_type = %policy.worker_type, path = %path.display(), "policy loaded");
            policies.push(policy);
        }
        Ok(policies)
    }

    async fn put_observed_state(&self, state: &ObservedState) -> StoreResult<()> {
        let dir = self.dir.join("observed");
        std::fs::create_dir_all(&dir).map_err(|e| StoreError(e.to_string()))?;
        let path = dir.join(format!("{}.json", state.worker_type));
        let raw = serde_json::to_string_pretty(state).map_err(|e| StoreError(e.to_string()))?;
        std::fs::write(&path, raw).map_err(|e| StoreError(format!("{}: {e}", path.display())))
    }
}

/// A queue whose backlog never changes: whatever the config file says.
pub struct StaticQueue {
    backlog: HashMap<String, i64>,
}

impl StaticQueue {
    pub fn new(backlog: HashMap<String, i64>) -> Self {
        Self { backlog }
    }
}

#[async_trait]
impl Queue for StaticQueue {
    async fn pending_tasks(&self, worker_type: &str) -> StoreResult<i64> {
        Ok(*self.backlog.get(worker_type).unwrap_or(&0))
    }
}

/// Logs secret creation instead of storing anything. The secret material
/// itself is never logged.
pub struct LogSecretStore;

#[async_trait]
impl SecretStore for LogSecretStore {
    async fn create_secret(&self, record: &SecretRecord) -> StoreResult<()> {
        info!(
            worker_type = %record.worker_type,
            scopes = record.scopes.len(),
            expires_at = record.expires_at,
            "secret record created (dev mode, not persisted)"
        );
        Ok(())
    }
}
