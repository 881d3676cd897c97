//! Versioned policy-store schema with load-time migration.
//!
//! The policy store persists worker type records tagged with a
//! `schema_version`. Only the current version (`WorkerTypePolicy`) ever
//! exists in memory; historical versions are decoded into their own structs
//! and upgraded through a chain of pure `migrate_*` functions on read.

use serde::Deserialize;
use thiserror::Error;

use crate::policy::{
    AvailabilityZoneSpec, InstanceTypeSpec, JsonObject, RegionSpec, WorkerTypePolicy,
};

/// Current schema version written by this process.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Errors decoding or migrating a stored policy record.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unsupported schema version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed policy record: {0}")]
    Decode(#[from] serde_json::Error),
}

// ── Historical versions ────────────────────────────────────────────

/// v1: flat price bounds, no per-type utility, no zone restrictions.
#[derive(Debug, Deserialize)]
struct PolicyV1 {
    worker_type: String,
    min_capacity: i64,
    max_capacity: i64,
    scaling_ratio: f64,
    max_price: f64,
    instance_types: Vec<InstanceTypeV1>,
    regions: Vec<RegionSpec>,
    #[serde(default)]
    launch_spec: JsonObject,
    #[serde(default)]
    user_data: JsonObject,
    last_modified: u64,
}

#[derive(Debug, Deserialize)]
struct InstanceTypeV1 {
    instance_type: String,
    capacity: u32,
    #[serde(default)]
    launch_spec: JsonObject,
    #[serde(default)]
    user_data: JsonObject,
}

/// v2: added per-type utility and a minimum price; still no zone
/// restrictions, secrets, or scopes.
#[derive(Debug, Deserialize)]
struct PolicyV2 {
    worker_type: String,
    min_capacity: i64,
    max_capacity: i64,
    scaling_ratio: f64,
    min_price: f64,
    max_price: f64,
    instance_types: Vec<InstanceTypeSpec>,
    regions: Vec<RegionSpec>,
    #[serde(default)]
    launch_spec: JsonObject,
    #[serde(default)]
    user_data: JsonObject,
    last_modified: u64,
}

fn migrate_v1_to_v2(old: PolicyV1) -> PolicyV2 {
    PolicyV2 {
        worker_type: old.worker_type,
        min_capacity: old.min_capacity,
        max_capacity: old.max_capacity,
        scaling_ratio: old.scaling_ratio,
        // v1 had no floor; zero preserves its behavior.
        min_price: 0.0,
        max_price: old.max_price,
        instance_types: old
            .instance_types
            .into_iter()
            .map(|t| InstanceTypeSpec {
                instance_type: t.instance_type,
                capacity: t.capacity,
                utility: 1.0,
                launch_spec: t.launch_spec,
                user_data: t.user_data,
            })
            .collect(),
        regions: old.regions,
        launch_spec: old.launch_spec,
        user_data: old.user_data,
        last_modified: old.last_modified,
    }
}

fn migrate_v2_to_current(old: PolicyV2) -> WorkerTypePolicy {
    WorkerTypePolicy {
        worker_type: old.worker_type,
        min_capacity: old.min_capacity,
        max_capacity: old.max_capacity,
        scaling_ratio: old.scaling_ratio,
        min_price: old.min_price,
        max_price: old.max_price,
        instance_types: old.instance_types,
        regions: old.regions,
        availability_zones: Vec::<AvailabilityZoneSpec>::new(),
        launch_spec: old.launch_spec,
        user_data: old.user_data,
        secrets: serde_json::Value::Null,
        scopes: vec![],
        last_modified: old.last_modified,
    }
}

// ── Entry point ────────────────────────────────────────────────────

/// A raw policy record as stored, carrying its schema version.
#[derive(Debug, Deserialize)]
pub struct VersionedPolicy {
    #[serde(default = "default_version")]
    pub schema_version: u32,
    #[serde(flatten)]
    body: serde_json::Value,
}

fn default_version() -> u32 {
    1
}

impl WorkerTypePolicy {
    /// Decode a stored record of any supported schema version, applying
    /// migrations sequentially until the current shape is reached.
    pub fn from_versioned(record: &serde_json::Value) -> Result<Self, SchemaError> {
        let versioned: VersionedPolicy = serde_json::from_value(record.clone())?;
        match versioned.schema_version {
            1 => {
                let v1: PolicyV1 = serde_json::from_value(versioned.body)?;
                Ok(migrate_v2_to_current(migrate_v1_to_v2(v1)))
            }
            2 => {
                let v2: PolicyV2 = serde_json::from_value(versioned.body)?;
                Ok(migrate_v2_to_current(v2))
            }
            CURRENT_SCHEMA_VERSION => Ok(serde_json::from_value(versioned.body)?),
            other => Err(SchemaError::UnsupportedVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn v1_record_migrates_with_defaults() {
        let record = json!({
            "schema_version": 1,
            "worker_type": "builder",
            "min_capacity": 0,
            "max_capacity": 20,
            "scaling_ratio": 0.1,
            "max_price": 1.5,
            "instance_types": [
                {"instance_type": "m5.large", "capacity": 2}
            ],
            "regions": [{"region": "us-east-1"}],
            "last_modified": 500
        });

        let policy = WorkerTypePolicy::from_versioned(&record).unwrap();
        assert_eq!(policy.worker_type, "builder");
        assert_eq!(policy.min_price, 0.0);
        assert_eq!(policy.instance_types[0].utility, 1.0);
        assert!(policy.availability_zones.is_empty());
        assert!(policy.scopes.is_empty());
    }

    #[test]
    fn untagged_record_is_treated_as_v1() {
        let record = json!({
            "worker_type": "builder",
            "min_capacity": 0,
            "max_capacity": 20,
            "scaling_ratio": 0.0,
            "max_price": 1.0,
            "instance_types": [],
            "regions": [],
            "last_modified": 0
        });

        let policy = WorkerTypePolicy::from_versioned(&record).unwrap();
        assert_eq!(policy.max_price, 1.0);
    }

    #[test]
    fn v2_record_migrates() {
        let record = json!({
            "schema_version": 2,
            "worker_type": "tester",
            "min_capacity": 1,
            "max_capacity": 10,
            "scaling_ratio": 0.5,
            "min_price": 0.02,
            "max_price": 0.8,
            "instance_types": [
                {"instance_type": "c5.xlarge", "capacity": 4, "utility": 2.0}
            ],
            "regions": [{"region": "us-west-2"}],
            "last_modified": 900
        });

        let policy = WorkerTypePolicy::from_versioned(&record).unwrap();
        assert_eq!(policy.min_price, 0.02);
        assert_eq!(policy.instance_types[0].utility, 2.0);
        assert!(policy.availability_zones.is_empty());
    }

    #[test]
    fn current_record_decodes_directly() {
        let record = json!({
            "schema_version": 3,
            "worker_type": "tester",
            "min_capacity": 1,
            "max_capacity": 10,
            "scaling_ratio": 0.5,
            "min_price": 0.02,
            "max_price": 0.8,
            "instance_types": [
                {"instance_type": "c5.xlarge", "capacity": 4, "utility": 2.0}
            ],
            "regions": [{"region": "us-west-2"}],
            "availability_zones": [
                {"region": "us-west-2", "availability_zone": "us-west-2b"}
            ],
            "scopes": ["worker:builder"],
            "last_modified": 900
        });

        let policy = WorkerTypePolicy::from_versioned(&record).unwrap();
        assert_eq!(policy.availability_zones.len(), 1);
        assert_eq!(policy.scopes, vec!["worker:builder".to_string()]);
    }

    #[test]
    fn future_version_is_rejected() {
        let record = json!({
            "schema_version": 9,
            "worker_type": "x"
        });
        assert!(matches!(
            WorkerTypePolicy::from_versioned(&record),
            Err(SchemaError::UnsupportedVersion(9))
        ));
    }
}
